//! pytest discovery profile

use super::{Classified, FailureSignature, FixContext, FixKind, FixProfile, FixResult};
use crate::adapter::python_interpreter;
use crate::analysis::is_ignored_dir;
use crate::errors::Result;
use crate::healer::{Permission, RemedyAction};
use crate::model::{ProjectDescriptor, RemediationStep, codes};
use crate::runner::CommandOutput;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

static COLLECTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(\d+) tests? collected").expect("Invalid regex pattern"));

static ERROR_COLLECTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ERROR collecting (\S+\.py)").expect("Invalid regex pattern"));

static SIGNATURES: Lazy<Vec<FailureSignature>> = Lazy::new(|| {
    vec![
        FailureSignature::new(
            codes::PYTEST_NOT_INSTALLED,
            r"No module named pytest",
            "pytest is not installed in the interpreter",
            Some(FixKind::InstallRunner),
        ),
        FailureSignature::new(
            codes::PYTHON_MODULE_NOT_FOUND,
            r"ModuleNotFoundError: No module named '([\w.]+)'",
            "A test imports a module that cannot be found",
            Some(FixKind::PythonModule),
        ),
        FailureSignature::new(
            codes::PYTEST_FIXTURE_NOT_FOUND,
            r"fixture '(\w+)' not found",
            "A test uses a fixture that does not exist",
            None,
        ),
        FailureSignature::new(
            codes::MODEL_VALIDATION_ERROR,
            r"(\d+) validation errors? for (\w+)",
            "A test builds a model with invalid data",
            Some(FixKind::RegenerateModel),
        ),
        FailureSignature::new(
            codes::PYTHON_IMPORT_ERROR,
            r"ImportError: cannot import name '(\w+)'|ImportError while importing test module '([^']+)'",
            "A test imports a name that does not exist",
            Some(FixKind::RegenerateFile),
        ),
        FailureSignature::new(
            codes::TEST_SYNTAX_ERROR,
            r"(?s)ERROR collecting (\S+\.py).*?(?:SyntaxError|IndentationError|TabError): ",
            "A generated test has a syntax error",
            Some(FixKind::RegenerateFile),
        ),
        FailureSignature::new(
            codes::TEST_DISCOVERY_PATTERN_MISMATCH,
            r"no tests ran|collected 0 items|no tests collected",
            "pytest collected no tests",
            Some(FixKind::DiscoveryConfig),
        ),
    ]
});

/// Import names whose distribution is called something else
const PIP_NAMES: &[(&str, &str)] = &[
    ("yaml", "pyyaml"),
    ("PIL", "pillow"),
    ("cv2", "opencv-python"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("jwt", "pyjwt"),
    ("multipart", "python-multipart"),
];

pub fn pip_name(module: &str) -> &str {
    let top = module.split('.').next().unwrap_or(module);
    PIP_NAMES.iter().find(|(import, _)| *import == top).map_or(top, |(_, dist)| *dist)
}

const CONFTEST_MARKER: &str = "# testforge: project import path";

fn conftest_path_block(dirs: &[&str]) -> String {
    let mut block = format!("{CONFTEST_MARKER}\nimport os\nimport sys\n\n_ROOT = os.path.dirname(os.path.abspath(__file__))\n");
    for dir in dirs {
        if dir.is_empty() {
            block.push_str("sys.path.insert(0, _ROOT)\n");
        } else {
            block.push_str(&format!("sys.path.insert(0, os.path.join(_ROOT, \"{dir}\"))\n"));
        }
    }
    block.push('\n');
    block
}

/// Where a top-level module lives inside the project, if it does
fn local_module_dir(root: &Path, top: &str) -> Option<&'static str> {
    ["", "src", "app"].into_iter().find(|base| {
        let dir = root.join(base);
        dir.join(top).join("__init__.py").is_file() || dir.join(top).is_dir() || dir.join(format!("{top}.py")).is_file()
    })
}

/// Source of `class <name>` in the project, up to the end of its body
pub fn find_class_source(root: &Path, name: &str) -> Option<String> {
    let header = format!("class {name}");
    let walker = WalkDir::new(root)
        .max_depth(8)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored_dir(e.file_name())));

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let lines: Vec<&str> = text.lines().collect();
        let Some(start) = lines.iter().position(|l| {
            l.starts_with(&header) && l[header.len()..].starts_with(['(', ':'])
        }) else {
            continue;
        };
        let end = lines[start + 1..]
            .iter()
            .position(|l| !l.trim().is_empty() && !l.starts_with(char::is_whitespace))
            .map_or(lines.len(), |p| start + 1 + p);
        return Some(lines[start..end].join("\n").trim_end().to_string());
    }
    None
}

pub struct PytestProfile;

impl PytestProfile {
    /// The test file a collection failure points at
    fn failing_file(&self, ctx: &FixContext<'_>, failure: &Classified) -> Option<PathBuf> {
        let collecting = ERROR_COLLECTING.captures(&failure.excerpt).map(|c| c[1].to_string());
        collecting
            .iter()
            .map(String::as_str)
            .chain(failure.captures.iter().map(String::as_str))
            .find_map(|candidate| ctx.test_file(candidate))
            .or_else(|| {
                ctx.test_files.iter().find(|f| {
                    f.file_name().and_then(|n| n.to_str()).is_some_and(|n| failure.excerpt.contains(n))
                }).cloned()
            })
    }

    async fn python_module(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> FixResult {
        let Some(module) = failure.capture(0) else {
            return FixResult::CannotFix("no module in failure output".to_string());
        };
        let top = module.split('.').next().unwrap_or(module);

        if let Some(base) = local_module_dir(ctx.root, top) {
            // Local package not importable from the tests: put its parent on sys.path
            let conftest = ctx.root.join("conftest.py");
            let existing = std::fs::read_to_string(&conftest).unwrap_or_default();
            if existing.contains(CONFTEST_MARKER) {
                return FixResult::CannotFix(format!("'{module}' still not importable after the path fix"));
            }
            let content = format!("{}{existing}", conftest_path_block(&["", base]));
            let issue = ctx.issue(failure).with_file("conftest.py").with_remediation(RemediationStep::file(
                "Fix import path",
                format!("Make '{top}' importable from the tests"),
                "conftest.py",
            ));
            debug!("'{}' is local to {}; patching conftest.py", top, ctx.project.name);
            return ctx.remediate(issue, Some(Permission::UpdateConfig), vec![RemedyAction::write("conftest.py", content)]).await;
        }

        let command = format!("{} -m pip install {}", python_interpreter(ctx.root), pip_name(module));
        let issue = ctx.issue(failure).with_remediation(RemediationStep::command(
            "Install module",
            format!("Install the distribution providing '{top}'"),
            &command,
        ));
        ctx.remediate(issue, Some(Permission::InstallDependencies), vec![RemedyAction::install(command)]).await
    }

    async fn discovery_config(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> Result<FixResult> {
        let before = ctx.healer.core().fixed_count();
        let rechecked = ctx.recheck_environment().await;
        let repaired = rechecked.is_ok() && ctx.healer.core().fixed_count() > before;

        let mut issue = ctx.issue(failure).with_file(ctx.test_dir);
        issue.auto_fixed = repaired;
        ctx.healer.core_mut().report(issue);
        match rechecked {
            Err(e) => Ok(FixResult::CannotFix(format!("discovery configuration repair failed: {e}"))),
            Ok(()) if repaired => Ok(FixResult::Applied),
            Ok(()) => Ok(FixResult::CannotFix("discovery configuration already matches the test files".to_string())),
        }
    }
}

#[async_trait]
impl FixProfile for PytestProfile {
    fn name(&self) -> &'static str {
        "pytest"
    }

    fn discovery_command(&self, _project: &ProjectDescriptor, root: &Path, test_dir: &Path) -> String {
        format!(
            "{} -m pytest --collect-only -q {}",
            python_interpreter(root),
            test_dir.to_string_lossy().replace('\\', "/")
        )
    }

    fn tests_discovered(&self, output: &CommandOutput) -> bool {
        output.success()
            && COLLECTED
                .captures(&output.combined())
                .and_then(|c| c[1].parse::<u32>().ok())
                .is_some_and(|n| n > 0)
    }

    fn signatures(&self) -> &'static [FailureSignature] {
        &SIGNATURES
    }

    async fn apply_fix(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> Result<FixResult> {
        let Some(fix) = failure.fix else {
            return Ok(FixResult::CannotFix(format!("no handler for {}", failure.code)));
        };

        match fix {
            FixKind::InstallRunner => {
                let command = format!("{} -m pip install pytest", python_interpreter(ctx.root));
                let issue = ctx.issue(failure).with_remediation(RemediationStep::command(
                    "Install pytest",
                    "Install pytest into the interpreter",
                    &command,
                ));
                Ok(ctx.remediate(issue, Some(Permission::InstallDependencies), vec![RemedyAction::install(command)]).await)
            }
            FixKind::PythonModule => Ok(self.python_module(ctx, failure).await),
            FixKind::DiscoveryConfig => self.discovery_config(ctx, failure).await,
            FixKind::RegenerateModel => {
                let Some(file) = self.failing_file(ctx, failure).or_else(|| ctx.test_files.first().cloned()) else {
                    return Ok(FixResult::CannotFix("no test file to regenerate".to_string()));
                };
                let model = failure.capture(1).unwrap_or_default().to_string();
                let context = find_class_source(ctx.root, &model);
                ctx.regenerate(failure, &file, context.as_deref()).await
            }
            FixKind::RegenerateFile => {
                let Some(file) = self.failing_file(ctx, failure) else {
                    return Ok(FixResult::CannotFix("error is outside the generated tests".to_string()));
                };
                ctx.regenerate(failure, &file, None).await
            }
            other => Ok(FixResult::CannotFix(format!("{other:?} does not apply to pytest"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofix::{AutoFixLoop, LoopState, classify};
    use crate::config::Config;
    use crate::healer::{EnvironmentHealer, HealPolicy, HealerCore, python::PythonHealer};
    use crate::model::Language;
    use crate::testing::{ScriptedRunner, StubGenerator};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn python_project(root: &Path) {
        let site = root.join(".venv/lib/python3.12/site-packages");
        std::fs::create_dir_all(site.join("pytest-8.2.0.dist-info")).unwrap();
        std::fs::write(root.join(".venv/pyvenv.cfg"), "home = /usr/bin\n").unwrap();
        std::fs::create_dir_all(root.join("tests/e2e")).unwrap();
    }

    #[test]
    fn test_classify_fixtures() {
        let table = PytestProfile.signatures();

        let missing = "ImportError while importing test module '/app/tests/unit/test_api.py'.\nE   ModuleNotFoundError: No module named 'yaml'";
        let hit = classify(table, missing).unwrap();
        assert_eq!(hit.code, codes::PYTHON_MODULE_NOT_FOUND);
        assert_eq!(hit.capture(0), Some("yaml"));
        assert_eq!(pip_name("yaml"), "pyyaml");

        let model = "E   pydantic_core._pydantic_core.ValidationError: 2 validation errors for User";
        let hit = classify(table, model).unwrap();
        assert_eq!(hit.code, codes::MODEL_VALIDATION_ERROR);
        assert_eq!(hit.capture(1), Some("User"));

        let none = "\nno tests ran in 0.01s\n";
        assert_eq!(classify(table, none).unwrap().code, codes::TEST_DISCOVERY_PATTERN_MISMATCH);

        let syntax = "ERROR collecting tests/unit/test_a.py\nE     File \"tests/unit/test_a.py\", line 3\nE   SyntaxError: invalid syntax";
        assert_eq!(classify(table, syntax).unwrap().code, codes::TEST_SYNTAX_ERROR);

        assert_eq!(classify(table, "/usr/bin/python3: No module named pytest").unwrap().code, codes::PYTEST_NOT_INSTALLED);
        assert!(classify(table, "Segmentation fault").is_none());
    }

    #[test]
    fn test_tests_discovered() {
        let profile = PytestProfile;
        assert!(profile.tests_discovered(&CommandOutput::new(0, "tests/test_a.py::test_x\n\n3 tests collected in 0.02s", "")));
        assert!(!profile.tests_discovered(&CommandOutput::new(5, "no tests ran in 0.01s", "")));
        assert!(!profile.tests_discovered(&CommandOutput::new(0, "0 tests collected", "")));
    }

    #[test]
    fn test_find_class_source() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("app")).unwrap();
        std::fs::write(
            temp.path().join("app/models.py"),
            "from pydantic import BaseModel\n\nclass UserBase(BaseModel):\n    pass\n\nclass User(BaseModel):\n    id: int\n    email: str\n\ndef helper():\n    pass\n",
        )
        .unwrap();
        assert_eq!(
            find_class_source(temp.path(), "User").as_deref(),
            Some("class User(BaseModel):\n    id: int\n    email: str")
        );
    }

    #[tokio::test]
    async fn test_discovery_mismatch_repaired_by_loop() {
        let temp = TempDir::new().unwrap();
        python_project(temp.path());
        std::fs::write(temp.path().join("pytest.ini"), "[pytest]\npython_files = test_*.py\n").unwrap();
        let files = vec![PathBuf::from("tests/e2e/checkout_e2e.py")];
        std::fs::write(temp.path().join(&files[0]), "def test_checkout():\n    assert True\n").unwrap();

        let runner = Arc::new(ScriptedRunner::new().on_sequence("--collect-only", vec![
            CommandOutput::new(5, "\nno tests ran in 0.01s\n", ""),
            CommandOutput::new(0, "tests/e2e/checkout_e2e.py::test_checkout\n\n1 test collected in 0.01s\n", ""),
        ]));
        let config = Config::default();
        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let generator = StubGenerator::new();
        let mut healer = PythonHealer::new(HealerCore::new(
            "api",
            HealPolicy::from(&config.auto_fix),
            runner.clone(),
            config.timeouts.clone(),
        ));
        let test_dir = PathBuf::from("tests/e2e");
        let mut ctx = FixContext {
            project: &project,
            root: temp.path(),
            test_dir: &test_dir,
            test_files: &files,
            healer: &mut healer,
            generator: &generator,
            config: &config,
        };

        let outcome = AutoFixLoop::new(&PytestProfile, runner.as_ref(), 5).run(&mut ctx).await;

        assert_eq!(outcome.terminal, LoopState::Success);
        assert_eq!(outcome.iterations, 2);
        let ini = std::fs::read_to_string(temp.path().join("pytest.ini")).unwrap();
        assert!(ini.contains("test_*.py"));
        assert!(ini.contains("*_e2e.py"));
        assert!(healer.issues().iter().all(|i| i.auto_fixed), "{:?}", healer.issues());
    }

    #[tokio::test]
    async fn test_syntax_error_regenerates_file() {
        let temp = TempDir::new().unwrap();
        python_project(temp.path());
        std::fs::write(temp.path().join("pytest.ini"), "[pytest]\n").unwrap();
        let files = vec![PathBuf::from("tests/e2e/test_cart.py")];
        std::fs::write(temp.path().join(&files[0]), "def test_(:\n").unwrap();

        let runner = Arc::new(ScriptedRunner::new().on_sequence("--collect-only", vec![
            CommandOutput::new(2, "ERROR collecting tests/e2e/test_cart.py\nE   SyntaxError: invalid syntax\n1 error in 0.02s", ""),
            CommandOutput::new(0, "1 test collected in 0.01s", ""),
        ]));
        let config = Config::default();
        let project = ProjectDescriptor::new("api", ".", Language::Python);
        let generator = StubGenerator::new().regenerates_with("def test_cart():\n    assert True\n");
        let mut healer = PythonHealer::new(HealerCore::new(
            "api",
            HealPolicy::from(&config.auto_fix),
            runner.clone(),
            config.timeouts.clone(),
        ));
        let test_dir = PathBuf::from("tests/e2e");
        let mut ctx = FixContext {
            project: &project,
            root: temp.path(),
            test_dir: &test_dir,
            test_files: &files,
            healer: &mut healer,
            generator: &generator,
            config: &config,
        };

        let outcome = AutoFixLoop::new(&PytestProfile, runner.as_ref(), 5).run(&mut ctx).await;

        assert_eq!(outcome.terminal, LoopState::Success);
        assert_eq!(generator.regenerated_files(), files);
        let content = std::fs::read_to_string(temp.path().join(&files[0])).unwrap();
        assert_eq!(content, "def test_cart():\n    assert True\n");
    }
}
