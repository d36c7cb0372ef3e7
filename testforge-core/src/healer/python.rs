//! Python environment diagnostics
//!
//! Besides the virtualenv and installed packages, this checks that pytest's
//! discovery configuration actually matches the generated test file names.
//! Config repairs only ever add patterns.

use super::{ConfigEdit, EnvironmentHealer, HealerCore, Permission, RemedyAction};
use crate::adapter::python_interpreter;
use crate::errors::Result;
use crate::model::{
    Ecosystem, EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use globset::Glob;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// pytest's `python_files` when nothing is configured
pub const DEFAULT_PYTHON_FILES: &[&str] = &["test_*.py", "*_test.py"];

const PYPROJECT_SECTION: &str = "tool.pytest.ini_options";

/// Config files pytest reads, in precedence order, with their INI section
const CONFIG_FILES: &[(&str, &str)] = &[
    ("pytest.ini", "pytest"),
    ("pyproject.toml", PYPROJECT_SECTION),
    ("tox.ini", "pytest"),
    ("setup.cfg", "tool:pytest"),
];

/// The pytest configuration in effect for a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Relative to the project root
    pub path: PathBuf,
    pub python_files: Option<Vec<String>>,
    pub pythonpath: Option<Vec<String>>,
}

impl DiscoveryConfig {
    pub fn effective_patterns(&self) -> Vec<String> {
        self.python_files
            .clone()
            .unwrap_or_else(|| DEFAULT_PYTHON_FILES.iter().map(|p| p.to_string()).collect())
    }
}

/// First pytest config in precedence order; `None` when pytest would run unconfigured
pub fn find_discovery_config(root: &Path) -> Option<DiscoveryConfig> {
    for (file, section) in CONFIG_FILES {
        let Ok(text) = std::fs::read_to_string(root.join(file)) else {
            continue;
        };

        if file.ends_with(".toml") {
            let Ok(table) = toml::from_str::<toml::Table>(&text) else {
                debug!("Unparseable {}", file);
                continue;
            };
            let Some(options) = table
                .get("tool")
                .and_then(|t| t.get("pytest"))
                .and_then(|p| p.get("ini_options"))
            else {
                continue;
            };
            return Some(DiscoveryConfig {
                path: PathBuf::from(file),
                python_files: options.get("python_files").map(toml_list),
                pythonpath: options.get("pythonpath").map(toml_list),
            });
        }

        // pytest.ini wins even without a [pytest] section
        let lines: Vec<&str> = text.lines().collect();
        if *file == "pytest.ini" || section_line(&lines, section).is_some() {
            return Some(DiscoveryConfig {
                path: PathBuf::from(file),
                python_files: ini_value(&lines, section, "python_files").map(split_args),
                pythonpath: ini_value(&lines, section, "pythonpath").map(split_args),
            });
        }
    }
    None
}

fn toml_list(value: &toml::Value) -> Vec<String> {
    match value {
        toml::Value::String(s) => split_args(s.clone()),
        toml::Value::Array(items) => items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn split_args(value: String) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn section_line(lines: &[&str], section: &str) -> Option<usize> {
    lines.iter().position(|l| section_name(l) == Some(section))
}

/// Lines `[start, end)` holding `key` in `section`, continuation lines included
fn ini_key_span(lines: &[&str], section: &str, key: &str) -> Option<(usize, usize)> {
    let mut current = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(name) = section_name(line) {
            current = Some(name);
            continue;
        }
        if current != Some(section) || line.starts_with(char::is_whitespace) {
            continue;
        }
        let Some((name, _)) = line.split_once(['=', ':']) else {
            continue;
        };
        if name.trim() == key {
            let mut end = i + 1;
            while end < lines.len()
                && lines[end].starts_with(char::is_whitespace)
                && !lines[end].trim().is_empty()
            {
                end += 1;
            }
            return Some((i, end));
        }
    }
    None
}

fn ini_value(lines: &[&str], section: &str, key: &str) -> Option<String> {
    let (start, end) = ini_key_span(lines, section, key)?;
    let (_, first) = lines[start].split_once(['=', ':'])?;
    let mut parts = vec![first.trim()];
    parts.extend(lines[start + 1..end].iter().map(|l| l.trim()));
    Some(parts.join(" "))
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Append `additions` to an INI key, creating the key (seeded with
/// `seed`) or the whole section when absent
fn ini_append(text: &str, section: &str, key: &str, seed: &[String], additions: &[String]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let mut values = seed.to_vec();
    values.extend(additions.iter().cloned());

    if let Some((_, end)) = ini_key_span(&lines, section, key) {
        out[end - 1] = format!("{} {}", out[end - 1].trim_end(), additions.join(" "));
    } else if let Some(header) = section_line(&lines, section) {
        out.insert(header + 1, format!("{key} = {}", values.join(" ")));
    } else {
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push(String::new());
        }
        out.push(format!("[{section}]"));
        out.push(format!("{key} = {}", values.join(" ")));
    }
    join_lines(out)
}

fn toml_array(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Same as [`ini_append`] for `[tool.pytest.ini_options]` in pyproject.toml
fn pyproject_append(text: &str, key: &str, seed: &[String], additions: &[String]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let mut values = seed.to_vec();
    values.extend(additions.iter().cloned());

    let Some(header) = section_line(&lines, PYPROJECT_SECTION) else {
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push(String::new());
        }
        out.push(format!("[{PYPROJECT_SECTION}]"));
        out.push(format!("{key} = {}", toml_array(&values)));
        return join_lines(out);
    };

    let section_end = lines[header + 1..]
        .iter()
        .position(|l| section_name(l).is_some())
        .map_or(lines.len(), |p| header + 1 + p);
    let key_line = (header + 1..section_end)
        .find(|&i| lines[i].split_once('=').is_some_and(|(k, _)| k.trim() == key));

    let Some(line) = key_line else {
        out.insert(header + 1, format!("{key} = {}", toml_array(&values)));
        return join_lines(out);
    };

    let value = lines[line].split_once('=').map(|(_, v)| v.trim()).unwrap_or_default();
    if let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = value.trim_matches(quote).trim();
        out[line] = format!("{key} = {quote}{inner} {}{quote}", additions.join(" "));
        return join_lines(out);
    }

    let Some(close) = (line..section_end).find(|&i| lines[i].contains(']')) else {
        return text.to_string();
    };
    let quoted: Vec<String> = additions.iter().map(|a| format!("\"{a}\"")).collect();

    if close == line {
        let text_line = &out[line];
        let (Some(open), Some(end)) = (text_line.find('['), text_line.rfind(']')) else {
            return text.to_string();
        };
        let inner = text_line[open + 1..end].trim();
        let separator = match inner {
            "" => "",
            _ if inner.ends_with(',') => " ",
            _ => ", ",
        };
        out[line] = format!("{}{separator}{}{}", &text_line[..end].trim_end(), quoted.join(", "), &text_line[end..]);
    } else {
        let previous = close - 1;
        let prev_trimmed = out[previous].trim_end().to_string();
        if !prev_trimmed.ends_with(',') && !prev_trimmed.ends_with('[') {
            out[previous] = format!("{prev_trimmed},");
        }
        for (offset, q) in quoted.iter().enumerate() {
            out.insert(close + offset, format!("    {q},"));
        }
    }
    join_lines(out)
}

fn ini_section_for(path: &Path) -> &'static str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    CONFIG_FILES.iter().find(|(f, _)| *f == name).map_or("pytest", |(_, s)| *s)
}

fn is_pyproject(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

/// Add `python_files` patterns to a pytest config, keeping what is there
pub fn add_file_patterns(path: &Path, text: &str, patterns: &[String]) -> String {
    let configured = parse_config_text(path, text).and_then(|c| c.python_files);
    let explicit = configured.is_some();
    let existing = configured.unwrap_or_else(|| DEFAULT_PYTHON_FILES.iter().map(|p| p.to_string()).collect());
    let additions: Vec<String> = patterns.iter().filter(|p| !existing.contains(p)).cloned().collect();
    if additions.is_empty() {
        return text.to_string();
    }

    // An absent key means pytest's defaults apply; keep them explicitly
    let seed: Vec<String> = if explicit { Vec::new() } else { existing };
    if is_pyproject(path) {
        pyproject_append(text, "python_files", &seed, &additions)
    } else {
        ini_append(text, ini_section_for(path), "python_files", &seed, &additions)
    }
}

/// Set `pythonpath` in a pytest config unless one is already present
pub fn set_pythonpath(path: &Path, text: &str, paths: &[String]) -> String {
    if parse_config_text(path, text).and_then(|c| c.pythonpath).is_some() {
        return text.to_string();
    }
    if is_pyproject(path) {
        pyproject_append(text, "pythonpath", &[], paths)
    } else {
        ini_append(text, ini_section_for(path), "pythonpath", &[], paths)
    }
}

fn parse_config_text(path: &Path, text: &str) -> Option<DiscoveryConfig> {
    if is_pyproject(path) {
        let table = toml::from_str::<toml::Table>(text).ok()?;
        let options = table.get("tool")?.get("pytest")?.get("ini_options")?;
        return Some(DiscoveryConfig {
            path: path.to_path_buf(),
            python_files: options.get("python_files").map(toml_list),
            pythonpath: options.get("pythonpath").map(toml_list),
        });
    }
    let lines: Vec<&str> = text.lines().collect();
    let section = ini_section_for(path);
    Some(DiscoveryConfig {
        path: path.to_path_buf(),
        python_files: ini_value(&lines, section, "python_files").map(split_args),
        pythonpath: ini_value(&lines, section, "pythonpath").map(split_args),
    })
}

/// Narrowest glob that still picks up `file_name`
pub fn infer_pattern(file_name: &str) -> String {
    let Some(stem) = file_name.strip_suffix(".py") else {
        return file_name.to_string();
    };
    if stem.starts_with("test") {
        return "test*.py".to_string();
    }
    if let Some((_, last)) = stem.rsplit_once('.') {
        return format!("*.{last}.py");
    }
    if let Some((_, last)) = stem.rsplit_once('_') {
        return format!("*_{last}.py");
    }
    if let Some((_, last)) = stem.rsplit_once('-') {
        return format!("*-{last}.py");
    }
    file_name.to_string()
}

pub fn matches_any(patterns: &[String], file_name: &str) -> bool {
    patterns
        .iter()
        .filter_map(|p| Glob::new(p).ok())
        .any(|g| g.compile_matcher().is_match(file_name))
}

/// Generated test files pytest would not collect, and patterns that fix that
fn undiscovered(patterns: &[String], generated: &[PathBuf]) -> (Vec<String>, Vec<String>) {
    let mut additions: Vec<String> = Vec::new();
    let mut missed = Vec::new();
    for path in generated {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".py") || name == "__init__.py" || name == "conftest.py" {
            continue;
        }
        if matches_any(patterns, name) || matches_any(&additions, name) {
            continue;
        }
        additions.push(infer_pattern(name));
        missed.push(name.to_string());
    }
    (additions, missed)
}

fn existing_venv(root: &Path) -> Option<PathBuf> {
    [".venv", "venv"]
        .iter()
        .map(|d| root.join(d))
        .find(|p| p.join("pyvenv.cfg").is_file() || p.join("bin").is_dir() || p.join("Scripts").is_dir())
}

fn site_packages(venv: &Path) -> Option<PathBuf> {
    let windows = venv.join("Lib").join("site-packages");
    if windows.is_dir() {
        return Some(windows);
    }
    std::fs::read_dir(venv.join("lib"))
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path().join("site-packages"))
        .find(|p| p.is_dir())
}

/// PEP 503-ish normalization so `PyYAML`, `pyyaml` and `py-yaml` compare sensibly
pub fn normalize_package(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['-', '.'], "_")
}

fn installed_packages(site: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(site) else {
        return HashSet::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .map(|name| {
            match name.strip_suffix(".dist-info").or_else(|| name.strip_suffix(".egg-info")) {
                Some(base) => normalize_package(base.split('-').next().unwrap_or(base)),
                None => normalize_package(name.strip_suffix(".py").unwrap_or(&name)),
            }
        })
        .collect()
}

/// Distribution names from a requirements file; options and includes are skipped
pub fn requirement_names(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.split('#').next().unwrap_or_default().trim())
        .filter(|l| !l.is_empty() && !l.starts_with('-'))
        .filter_map(|l| {
            let end = l.find(|c: char| "=<>!~[;@ ".contains(c)).unwrap_or(l.len());
            let name = &l[..end];
            (!name.is_empty()).then(|| normalize_package(name))
        })
        .collect()
}

fn src_layout(root: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(root.join("src")) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).map(|e| e.path()).any(|p| {
        p.extension().and_then(|e| e.to_str()) == Some("py") || p.join("__init__.py").is_file()
    })
}

pub struct PythonHealer {
    core: HealerCore,
}

impl PythonHealer {
    pub fn new(core: HealerCore) -> Self {
        Self { core }
    }

    fn issue(&self, severity: Severity, code: &str, message: impl Into<String>) -> EnvironmentIssue {
        EnvironmentIssue::new(self.core.project(), Stage::EnvSetup, severity, code, message)
    }

    fn check_packages(&mut self, root: &Path, venv_planned: bool) {
        let python = if venv_planned { venv_python() } else { python_interpreter(root) };
        let installed = existing_venv(root).and_then(|v| site_packages(&v)).map(|s| installed_packages(&s));

        // Without a venv there is nothing reliable to inspect
        let is_missing = |name: &str| match &installed {
            Some(set) => !set.contains(&normalize_package(name)),
            None => venv_planned,
        };

        if is_missing("pytest") {
            let command = format!("{python} -m pip install pytest");
            let issue = self
                .issue(Severity::Error, codes::PYTEST_NOT_INSTALLED, "pytest is not installed")
                .with_remediation(RemediationStep::command("Install pytest", "Install pytest into the environment", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }

        let Ok(requirements) = std::fs::read_to_string(root.join("requirements.txt")) else {
            return;
        };
        let missing: Vec<String> = requirement_names(&requirements).into_iter().filter(|r| is_missing(r)).collect();
        if !missing.is_empty() {
            let command = format!("{python} -m pip install -r requirements.txt");
            let issue = self
                .issue(
                    Severity::Error,
                    codes::PYTHON_REQUIREMENTS_NOT_INSTALLED,
                    format!("{} requirement(s) not installed", missing.len()),
                )
                .with_file("requirements.txt")
                .with_details(missing.join(", "))
                .with_remediation(RemediationStep::command("Install requirements", "Install requirements.txt", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }
    }

    fn check_discovery(&mut self, root: &Path, generated: &[PathBuf]) {
        let needs_src = src_layout(root) && !root.join("conftest.py").is_file();

        let Some(config) = find_discovery_config(root) else {
            let defaults: Vec<String> = DEFAULT_PYTHON_FILES.iter().map(|p| p.to_string()).collect();
            let (additions, _) = undiscovered(&defaults, generated);
            let mut patterns = defaults;
            patterns.extend(additions);

            let mut content = format!("[pytest]\npython_files = {}\n", patterns.join(" "));
            content.push_str(if needs_src { "pythonpath = . src\n" } else { "pythonpath = .\n" });

            let issue = self
                .issue(Severity::Warning, codes::PYTEST_CONFIG_MISSING, "No pytest configuration found")
                .with_file("pytest.ini")
                .with_remediation(RemediationStep::file("Create pytest.ini", "Add a pytest configuration", "pytest.ini"));
            self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::write("pytest.ini", content)]);
            return;
        };

        let patterns = config.effective_patterns();
        let (additions, missed) = undiscovered(&patterns, generated);
        if !additions.is_empty() {
            let issue = self
                .issue(
                    Severity::Warning,
                    codes::TEST_DISCOVERY_PATTERN_MISMATCH,
                    format!("python_files ({}) does not match {}", patterns.join(" "), missed.join(", ")),
                )
                .with_file(&config.path)
                .with_details(format!("Patterns to add: {}", additions.join(" ")))
                .with_remediation(RemediationStep::file(
                    "Extend python_files",
                    format!("Add {} to python_files", additions.join(" ")),
                    &config.path,
                ));
            self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::Edit {
                path: config.path.clone(),
                edit: ConfigEdit::PytestFilePatterns(additions),
            }]);
        }

        let has_src = config.pythonpath.as_ref().is_some_and(|p| p.iter().any(|e| e.trim_end_matches('/') == "src"));
        if needs_src && !has_src {
            let issue = self
                .issue(Severity::Warning, codes::PYTHONPATH_MISCONFIGURED, "src layout without pythonpath = src")
                .with_file(&config.path)
                .with_remediation(RemediationStep::file("Set pythonpath", "Add pythonpath = src", &config.path));
            self.core.plan(issue, Permission::UpdateConfig, vec![RemedyAction::Edit {
                path: config.path.clone(),
                edit: ConfigEdit::PytestPythonpath(vec!["src".to_string()]),
            }]);
        }
    }
}

fn venv_python() -> String {
    if cfg!(windows) { ".venv\\Scripts\\python.exe".to_string() } else { ".venv/bin/python".to_string() }
}

impl EnvironmentHealer for PythonHealer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Python
    }

    fn core(&self) -> &HealerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HealerCore {
        &mut self.core
    }

    fn analyze(&mut self, _project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()> {
        let mut venv_planned = false;
        if existing_venv(root).is_none() {
            let issue = self
                .issue(Severity::Warning, codes::PYTHON_VENV_MISSING, "No virtual environment found")
                .with_remediation(RemediationStep::command(
                    "Create virtualenv",
                    "Create a project-local virtual environment",
                    "python3 -m venv .venv",
                ));
            self.core.plan(issue, Permission::CreateEnvironment, vec![RemedyAction::install("python3 -m venv .venv")]);
            venv_planned = self.core.policy().allows(Permission::CreateEnvironment);
        }

        self.check_packages(root, venv_planned);
        self.check_discovery(root, generated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoFixConfig, TimeoutsConfig};
    use crate::healer::HealPolicy;
    use crate::model::Language;
    use crate::testing::ScriptedRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn healer(runner: Arc<ScriptedRunner>) -> PythonHealer {
        PythonHealer::new(HealerCore::new(
            "api",
            HealPolicy::from(&AutoFixConfig::default()),
            runner,
            TimeoutsConfig::default(),
        ))
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_discovery_mismatch_extends_patterns() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("pytest.ini"), "[pytest]\npython_files = test_*.py\n").unwrap();
        std::fs::create_dir_all(temp.path().join("tests/e2e")).unwrap();
        std::fs::write(temp.path().join("tests/e2e/checkout_e2e.py"), "def test_checkout():\n    pass\n").unwrap();

        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let generated = vec![PathBuf::from("tests/e2e/checkout_e2e.py")];
        let mut healer = healer(Arc::new(ScriptedRunner::new()));

        healer.analyze(&project, temp.path(), &generated).unwrap();
        let mismatch = healer
            .issues()
            .iter()
            .find(|i| i.code == codes::TEST_DISCOVERY_PATTERN_MISMATCH)
            .unwrap()
            .clone();
        assert_eq!(mismatch.file_path.as_deref(), Some(Path::new("pytest.ini")));

        healer.heal(temp.path()).await.unwrap();

        let config = std::fs::read_to_string(temp.path().join("pytest.ini")).unwrap();
        assert_eq!(config, "[pytest]\npython_files = test_*.py *_e2e.py\n");
        let found = find_discovery_config(temp.path()).unwrap();
        assert!(matches_any(&found.effective_patterns(), "checkout_e2e.py"));
        assert!(matches_any(&found.effective_patterns(), "test_cart.py"));

        // Nothing new once the config matches
        let before = healer.issues().len();
        healer.analyze(&project, temp.path(), &generated).unwrap();
        assert_eq!(healer.issues().len(), before);
    }

    #[test]
    fn test_config_precedence_and_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("setup.cfg"), "[metadata]\nname = x\n").unwrap();
        assert_eq!(find_discovery_config(temp.path()), None);

        std::fs::write(
            temp.path().join("pyproject.toml"),
            "[tool.pytest.ini_options]\npython_files = [\"check_*.py\"]\n",
        )
        .unwrap();
        let config = find_discovery_config(temp.path()).unwrap();
        assert_eq!(config.path, PathBuf::from("pyproject.toml"));
        assert_eq!(config.effective_patterns(), strings(&["check_*.py"]));

        std::fs::write(temp.path().join("pytest.ini"), "").unwrap();
        let config = find_discovery_config(temp.path()).unwrap();
        assert_eq!(config.path, PathBuf::from("pytest.ini"));
        assert_eq!(config.effective_patterns(), strings(DEFAULT_PYTHON_FILES));
    }

    #[test]
    fn test_infer_pattern() {
        assert_eq!(infer_pattern("checkout_e2e.py"), "*_e2e.py");
        assert_eq!(infer_pattern("tests_cart.py"), "test*.py");
        assert_eq!(infer_pattern("cart.spec.py"), "*.spec.py");
        assert_eq!(infer_pattern("smoke.py"), "smoke.py");
    }

    #[test]
    fn test_edits_keep_existing_patterns() {
        let additions = strings(&["*_e2e.py"]);

        let multi = "[pytest]\npython_files =\n    test_*.py\n    check_*.py\naddopts = -q\n";
        let edited = add_file_patterns(Path::new("pytest.ini"), multi, &additions);
        assert_eq!(edited, "[pytest]\npython_files =\n    test_*.py\n    check_*.py *_e2e.py\naddopts = -q\n");

        let cfg = "[tool:pytest]\naddopts = -q\n";
        let edited = add_file_patterns(Path::new("setup.cfg"), cfg, &additions);
        assert!(edited.contains("python_files = test_*.py *_test.py *_e2e.py"));

        let toml = "[tool.pytest.ini_options]\npython_files = [\"test_*.py\"]\n";
        let edited = add_file_patterns(Path::new("pyproject.toml"), toml, &additions);
        assert!(edited.contains("python_files = [\"test_*.py\", \"*_e2e.py\"]"));

        let toml = "[tool.pytest.ini_options]\npython_files = [\n    \"test_*.py\"\n]\n";
        let edited = add_file_patterns(Path::new("pyproject.toml"), toml, &additions);
        assert_eq!(edited, "[tool.pytest.ini_options]\npython_files = [\n    \"test_*.py\",\n    \"*_e2e.py\",\n]\n");

        // Already present: unchanged
        let done = "[pytest]\npython_files = test_*.py *_e2e.py\n";
        assert_eq!(add_file_patterns(Path::new("pytest.ini"), done, &additions), done);
    }

    #[test]
    fn test_missing_config_and_venv() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src/shop")).unwrap();
        std::fs::write(temp.path().join("src/shop/__init__.py"), "").unwrap();
        std::fs::write(temp.path().join("requirements.txt"), "requests>=2\n# dev\n-r dev.txt\n").unwrap();

        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let mut healer = healer(Arc::new(ScriptedRunner::new()));
        healer.analyze(&project, temp.path(), &[]).unwrap();

        let found: Vec<&str> = healer.issues().iter().map(|i| i.code.as_str()).collect();
        assert_eq!(
            found,
            vec![
                codes::PYTHON_VENV_MISSING,
                codes::PYTEST_NOT_INSTALLED,
                codes::PYTHON_REQUIREMENTS_NOT_INSTALLED,
                codes::PYTEST_CONFIG_MISSING,
            ]
        );
        let pytest = &healer.issues()[1];
        assert_eq!(pytest.remediation[0].command.as_deref(), Some(format!("{} -m pip install pytest", venv_python()).as_str()));
    }

    #[test]
    fn test_installed_packages_are_detected() {
        let temp = TempDir::new().unwrap();
        let site = temp.path().join(".venv/lib/python3.12/site-packages");
        std::fs::create_dir_all(site.join("pytest-8.2.0.dist-info")).unwrap();
        std::fs::create_dir_all(site.join("PyYAML-6.0.1.dist-info")).unwrap();
        std::fs::write(temp.path().join(".venv/pyvenv.cfg"), "home = /usr/bin\n").unwrap();
        std::fs::write(temp.path().join("requirements.txt"), "pyyaml==6.0.1\n").unwrap();
        std::fs::write(temp.path().join("pytest.ini"), "[pytest]\n").unwrap();

        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let mut healer = healer(Arc::new(ScriptedRunner::new()));
        healer.analyze(&project, temp.path(), &[]).unwrap();
        assert!(healer.issues().is_empty(), "{:?}", healer.issues());
    }

    #[test]
    fn test_requirement_names() {
        assert_eq!(
            requirement_names("Flask[async]>=2\n-e .\nrequests ; python_version>'3'\n\nfoo.bar==1 # pin\n"),
            strings(&["flask", "requests", "foo_bar"])
        );
    }
}
