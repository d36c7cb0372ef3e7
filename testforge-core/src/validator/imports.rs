//! Import sanity gate
//!
//! Relative module references in generated tests are resolved against the
//! file's intended location, then by a bounded search of conventional source
//! directories. Misplaced imports are rewritten, missing ones commented out,
//! and files with too many missing imports are skipped entirely.

use crate::analysis::is_ignored_dir;
use regex_utils::imports::{self, ImportForm, ImportRef};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// More unresolved imports than this and the file is not written
pub const MAX_UNRESOLVED_IMPORTS: usize = 3;

const RESOLVE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mjs",
    ".cjs",
    ".json",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

const MODULE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"];

const SEARCH_ROOTS: &[&str] = &["src", "lib", "app", "services", "."];

const SEARCH_DEPTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCorrection {
    pub original: String,
    pub corrected: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImport {
    pub specifier: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDecision {
    /// Write `content`, which already carries corrections and commented-out lines
    Write {
        content: String,
        corrections: Vec<ImportCorrection>,
        unresolved: Vec<UnresolvedImport>,
    },
    Skip { reason: String, unresolved: Vec<UnresolvedImport> },
}

impl ImportDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Check `content` as if written to `file_path` inside `project_root`
pub fn check_imports(file_path: &Path, content: &str, project_root: &Path) -> ImportDecision {
    let file_path = normalize(file_path);
    let file_dir = file_path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut corrections = Vec::new();
    let mut unresolved = Vec::new();

    for import in imports::extract(content).into_iter().filter(|i| imports::is_relative(&i.specifier)) {
        if resolve_direct(&file_dir, &import.specifier).is_some() {
            continue;
        }

        match search(project_root, &file_path, &import.specifier) {
            Some(found) => {
                let corrected = specifier_for(&file_dir, &found, &import.specifier);
                if corrected != import.specifier {
                    debug!("Import '{}' corrected to '{}'", import.specifier, corrected);
                    corrections.push(ImportCorrection {
                        original: import.specifier.clone(),
                        corrected,
                        line: import.line,
                    });
                    continue;
                }
                unresolved.push(UnresolvedImport { specifier: import.specifier, line: import.line });
            }
            None => unresolved.push(UnresolvedImport { specifier: import.specifier, line: import.line }),
        }
    }

    if unresolved.len() > MAX_UNRESOLVED_IMPORTS {
        return ImportDecision::Skip {
            reason: format!(
                "{} unresolved relative imports (limit {})",
                unresolved.len(),
                MAX_UNRESOLVED_IMPORTS
            ),
            unresolved,
        };
    }

    let content = patch(content, &corrections, &unresolved, comment_prefix(&file_path));
    ImportDecision::Write { content, corrections, unresolved }
}

/// Corrected specifier for a relative import that does not resolve from
/// `file_path`, if a module with the same name exists elsewhere
pub fn suggest_specifier(file_path: &Path, specifier: &str, project_root: &Path) -> Option<String> {
    let file_path = normalize(file_path);
    let file_dir = file_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if resolve_direct(&file_dir, specifier).is_some() {
        return None;
    }
    let found = search(project_root, &file_path, specifier)?;
    let corrected = specifier_for(&file_dir, &found, specifier);
    (corrected != specifier).then_some(corrected)
}

fn resolve_direct(file_dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = file_dir.join(specifier);
    let base_str = base.to_string_lossy().to_string();

    let mut bases = vec![base_str.clone()];
    // `./math.js` may be written for a `math.ts` source
    if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
        if MODULE_EXTENSIONS.contains(&ext) {
            bases.push(base_str[..base_str.len() - ext.len() - 1].to_string());
        }
    }

    bases
        .iter()
        .flat_map(|b| RESOLVE_SUFFIXES.iter().map(move |s| PathBuf::from(format!("{b}{s}"))))
        .find(|p| p.is_file())
}

fn module_stem(specifier: &str) -> Option<String> {
    let last = Path::new(specifier).file_name()?.to_str()?;
    let stem = match Path::new(last).extension().and_then(|e| e.to_str()) {
        Some(ext) if MODULE_EXTENSIONS.contains(&ext) => &last[..last.len() - ext.len() - 1],
        _ => last,
    };
    (!stem.is_empty() && stem != "index" && stem != "." && stem != "..").then(|| stem.to_string())
}

fn search(project_root: &Path, file_path: &Path, specifier: &str) -> Option<PathBuf> {
    let stem = module_stem(specifier)?;

    for root in SEARCH_ROOTS {
        let dir = project_root.join(root);
        if !dir.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&dir)
            .max_depth(SEARCH_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored_dir(e.file_name())));

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || normalize(path) == file_path {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.contains(".test.") || name.contains(".spec.") {
                continue;
            }
            let matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str())
                && path.extension().and_then(|e| e.to_str()).is_some_and(|e| MODULE_EXTENSIONS.contains(&e));
            if matches {
                return Some(normalize(path));
            }
        }
    }
    None
}

/// Relative specifier from `file_dir` to `target`, keeping the original's
/// extension style
fn specifier_for(file_dir: &Path, target: &Path, original: &str) -> String {
    let keep_extension = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MODULE_EXTENSIONS.contains(&e));
    let target = if keep_extension { target.to_path_buf() } else { target.with_extension("") };

    let rel = relative_path(file_dir, &target);
    let rel = rel.to_string_lossy().replace('\\', "/");
    if rel.starts_with("../") { rel } else { format!("./{rel}") }
}

/// Lexical normalization of `.` and `..`
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub(crate) fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = normalize(from_dir).components().map(|c| c.as_os_str().to_owned()).collect();
    let to_parts: Vec<_> = normalize(to).components().map(|c| c.as_os_str().to_owned()).collect();

    let common = from.iter().zip(&to_parts).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part);
    }
    rel
}

fn comment_prefix(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py" | "rb" | "sh") => "# ",
        _ => "// ",
    }
}

fn patch(
    content: &str,
    corrections: &[ImportCorrection],
    unresolved: &[UnresolvedImport],
    prefix: &str,
) -> String {
    let mut patched = content.to_string();
    for correction in corrections {
        for quote in ['\'', '"', '`'] {
            patched = patched.replace(
                &format!("{quote}{}{quote}", correction.original),
                &format!("{quote}{}{quote}", correction.corrected),
            );
        }
    }

    if unresolved.is_empty() {
        return patched;
    }

    // Line numbers are stable: corrections never add or remove lines
    let refs: Vec<ImportRef> = imports::extract(&patched);
    let mut lines: Vec<String> = patched.lines().map(str::to_string).collect();
    let mut commented = vec![false; lines.len()];

    for missing in unresolved {
        let form = refs
            .iter()
            .find(|r| r.line == missing.line && r.specifier == missing.specifier)
            .map(|r| r.form)
            .unwrap_or(ImportForm::Call);
        let end = missing.line.saturating_sub(1);
        let start = statement_start(&lines, end, form);
        for idx in start..=end.min(lines.len().saturating_sub(1)) {
            if !commented[idx] {
                lines[idx] = format!("{prefix}{}", lines[idx]);
                commented[idx] = true;
            }
        }
    }

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// First line of a multi-line `import { ... } from` statement
fn statement_start(lines: &[String], end: usize, form: ImportForm) -> usize {
    if form != ImportForm::EsModule || end >= lines.len() {
        return end;
    }
    let first = end.saturating_sub(10);
    (first..=end)
        .rev()
        .find(|&i| {
            let trimmed = lines[i].trim_start();
            trimmed.starts_with("import ") || trimmed.starts_with("export ")
        })
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "export {};\n").unwrap();
    }

    #[test]
    fn test_direct_resolution_leaves_content() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/math.ts");
        let file = temp.path().join("src/math.test.ts");
        let content = "import { add } from './math';\n";

        let decision = check_imports(&file, content, temp.path());
        assert_eq!(
            decision,
            ImportDecision::Write { content: content.to_string(), corrections: vec![], unresolved: vec![] }
        );
    }

    #[test]
    fn test_js_extension_resolves_ts_source() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/math.ts");
        let file = temp.path().join("src/a.test.ts");
        let decision = check_imports(&file, "import { add } from './math.js';\n", temp.path());
        let ImportDecision::Write { corrections, unresolved, .. } = decision else { panic!("skipped") };
        assert!(corrections.is_empty());
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_misplaced_import_is_rewritten() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/services/cart.ts");
        let file = temp.path().join("tests/unit/cart.test.ts");
        let content = "import { Cart } from '../cart';\n\ntest('x', () => expect(new Cart()).toBeTruthy());\n";

        let ImportDecision::Write { content, corrections, unresolved } =
            check_imports(&file, content, temp.path())
        else {
            panic!("expected write");
        };

        assert!(unresolved.is_empty());
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].corrected, "../../src/services/cart");
        assert!(content.starts_with("import { Cart } from '../../src/services/cart';"));
        assert!(!content.contains("// import"));
    }

    #[test]
    fn test_three_unresolved_are_commented() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("tests/unit/a.test.js");
        let content = "const a = require('./ghost1');\n\
                       const b = require('./ghost2');\n\
                       import {\n  c,\n} from './ghost3';\n\
                       test('ok', () => {});\n";

        let ImportDecision::Write { content, unresolved, .. } = check_imports(&file, content, temp.path()) else {
            panic!("expected write");
        };

        assert_eq!(unresolved.len(), 3);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("// const a"));
        assert!(lines[1].starts_with("// const b"));
        assert_eq!(lines[2], "// import {");
        assert_eq!(lines[3], "//   c,");
        assert_eq!(lines[4], "// } from './ghost3';");
        assert_eq!(lines[5], "test('ok', () => {});");
    }

    #[test]
    fn test_four_unresolved_skip_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("tests/unit/a.test.js");
        let content = "import a from './g1';\nimport b from './g2';\nimport c from './g3';\nimport d from './g4';\n";

        match check_imports(&file, content, temp.path()) {
            ImportDecision::Skip { reason, unresolved } => {
                assert_eq!(unresolved.len(), 4);
                assert!(reason.contains('4'));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[test]
    fn test_packages_are_ignored() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.test.js");
        let content = "import React from 'react';\nconst x = require('@scope/pkg');\n";
        let ImportDecision::Write { unresolved, .. } = check_imports(&file, content, temp.path()) else {
            panic!("expected write");
        };
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/r/tests/unit"), Path::new("/r/src/a.ts")),
            PathBuf::from("../../src/a.ts")
        );
        assert_eq!(relative_path(Path::new("/r/src"), Path::new("/r/src/lib/a")), PathBuf::from("lib/a"));
    }
}
