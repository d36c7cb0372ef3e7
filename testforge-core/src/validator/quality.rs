//! Quality gate: run the ecosystem's own checker over a written test file

use crate::adapter::python_interpreter;
use crate::runner::CommandRunner;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// TypeScript 1xxx diagnostics are parser errors
static TS_SYNTAX_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"error TS1\d{3}:").expect("Invalid regex pattern"));

static JS_SYNTAX_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"SyntaxError:").expect("Invalid regex pattern"));

/// Module-system complaints from `node --check` are not broken syntax. A
/// bare `Unexpected token '{'` only counts when node points at an
/// `import {` or `export {` line.
static JS_MODULE_MISMATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Cannot use import statement outside a module|Unexpected token 'export'|(?:import|export)\s*\{[^\n]*\n[ \t^]*\n(?:[ \t]*\n)?SyntaxError: Unexpected token '\{'",
    )
    .expect("Invalid regex pattern")
});

static PY_SYNTAX_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(SyntaxError|IndentationError|TabError):").expect("Invalid regex pattern"));

/// gofmt only parses, so any positional error is a syntax error
static GO_PARSE_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\d+:\d+: (expected|illegal|missing)").expect("Invalid regex pattern"));

static CHECKER_MISSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)command not found|not recognized as an internal|could not determine executable|No such file or directory")
        .expect("Invalid regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityVerdict {
    Clean,
    /// No checker for this file type, or the checker is not installed
    Unchecked,
    Failed {
        output: String,
        /// Syntax-level breakage the file cannot recover from
        irrecoverable: bool,
    },
}

/// Run the checker for `file` (relative to `project_root`)
pub async fn check_file(
    runner: &dyn CommandRunner,
    project_root: &Path,
    file: &Path,
    timeout: Duration,
) -> QualityVerdict {
    let shown = file.to_string_lossy().replace('\\', "/");
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();

    let (command, syntax): (String, &Lazy<Regex>) = match ext {
        "ts" | "tsx" => (
            format!("npx --no-install tsc --noEmit --skipLibCheck --esModuleInterop \"{shown}\""),
            &TS_SYNTAX_ERROR,
        ),
        "js" | "jsx" | "mjs" | "cjs" => (format!("node --check \"{shown}\""), &JS_SYNTAX_ERROR),
        "py" => (
            format!("{} -m py_compile \"{shown}\"", python_interpreter(project_root)),
            &PY_SYNTAX_ERROR,
        ),
        "go" => (format!("gofmt -e -l \"{shown}\""), &GO_PARSE_ERROR),
        _ => return QualityVerdict::Unchecked,
    };

    let output = match runner.execute(&command, project_root, timeout).await {
        Ok(output) => output,
        Err(e) => {
            warn!("Quality gate for {} not run: {}", shown, e);
            return QualityVerdict::Unchecked;
        }
    };

    if output.success() {
        return QualityVerdict::Clean;
    }

    let combined = output.combined();
    if output.exit_code == 127
        || (CHECKER_MISSING.is_match(&combined) && !syntax.is_match(&combined))
    {
        debug!("Checker unavailable for {}: {}", shown, combined.trim());
        return QualityVerdict::Unchecked;
    }

    let irrecoverable = syntax.is_match(&combined) && !JS_MODULE_MISMATCH.is_match(&combined);
    QualityVerdict::Failed { output: combined, irrecoverable }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_python_syntax_error_is_irrecoverable() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "py_compile",
            CommandOutput::new(1, "", "  File \"tests/unit/test_a.py\", line 3\n    def broken(:\nSyntaxError: invalid syntax"),
        );

        let verdict = check_file(&runner, temp.path(), Path::new("tests/unit/test_a.py"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: true, .. }));
    }

    #[tokio::test]
    async fn test_ts_type_error_is_recoverable() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "tsc",
            CommandOutput::new(2, "tests/a.test.ts(4,7): error TS2322: Type 'string' is not assignable to type 'number'.", ""),
        );

        let verdict = check_file(&runner, temp.path(), Path::new("tests/a.test.ts"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: false, .. }));

        let runner = ScriptedRunner::new()
            .on("tsc", CommandOutput::new(2, "tests/a.test.ts(1,5): error TS1005: ';' expected.", ""));
        let verdict = check_file(&runner, temp.path(), Path::new("tests/a.test.ts"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: true, .. }));
    }

    #[tokio::test]
    async fn test_esm_in_node_check_is_recoverable() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "node --check",
            CommandOutput::new(1, "", "SyntaxError: Cannot use import statement outside a module"),
        );
        let verdict = check_file(&runner, temp.path(), Path::new("a.test.js"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: false, .. }));
    }

    #[tokio::test]
    async fn test_brace_syntax_error_outside_module_syntax_is_irrecoverable() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "node --check",
            CommandOutput::new(
                1,
                "",
                "/app/a.test.js:4\nconst totals = sum() { a: 1 };\n               ^\n\nSyntaxError: Unexpected token '{'",
            ),
        );
        let verdict = check_file(&runner, temp.path(), Path::new("a.test.js"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: true, .. }));

        let runner = ScriptedRunner::new().on(
            "node --check",
            CommandOutput::new(
                1,
                "",
                "/app/a.test.js:1\nexport { add } from './math';\n       ^\n\nSyntaxError: Unexpected token '{'",
            ),
        );
        let verdict = check_file(&runner, temp.path(), Path::new("a.test.js"), TIMEOUT).await;
        assert!(matches!(verdict, QualityVerdict::Failed { irrecoverable: false, .. }));
    }

    #[tokio::test]
    async fn test_checker_timeout_is_unchecked() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on_timeout("py_compile");
        let verdict = check_file(&runner, temp.path(), Path::new("tests/unit/test_a.py"), TIMEOUT).await;
        assert_eq!(verdict, QualityVerdict::Unchecked);
    }

    #[tokio::test]
    async fn test_missing_checker_and_unknown_type() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on("gofmt", CommandOutput::new(127, "", "sh: gofmt: command not found"));
        let verdict = check_file(&runner, temp.path(), Path::new("a_test.go"), TIMEOUT).await;
        assert_eq!(verdict, QualityVerdict::Unchecked);

        let verdict = check_file(&runner, temp.path(), Path::new("FooTest.java"), TIMEOUT).await;
        assert_eq!(verdict, QualityVerdict::Unchecked);
        assert_eq!(runner.calls().len(), 1);
    }
}
