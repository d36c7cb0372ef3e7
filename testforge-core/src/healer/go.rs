//! Go module diagnostics

use super::{EnvironmentHealer, HealerCore, Permission, RemedyAction, read_generated};
use crate::errors::Result;
use crate::model::{
    Ecosystem, EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use std::path::{Path, PathBuf};

/// Third-party test modules commonly used by generated Go tests
pub const TEST_MODULES: &[(&str, &str)] = &[
    ("github.com/stretchr/testify", "github.com/stretchr/testify"),
    ("github.com/golang/mock", "github.com/golang/mock"),
    ("go.uber.org/mock", "go.uber.org/mock"),
    ("github.com/google/go-cmp", "github.com/google/go-cmp"),
];

/// Modules imported by a test file that a go.mod must require
fn required_modules(content: &str) -> Vec<&'static str> {
    TEST_MODULES
        .iter()
        .filter(|(import, _)| content.contains(&format!("\"{import}")))
        .map(|(_, module)| *module)
        .collect()
}

pub struct GoHealer {
    core: HealerCore,
}

impl GoHealer {
    pub fn new(core: HealerCore) -> Self {
        Self { core }
    }

    fn issue(&self, severity: Severity, code: &str, message: impl Into<String>) -> EnvironmentIssue {
        EnvironmentIssue::new(self.core.project(), Stage::EnvSetup, severity, code, message)
    }
}

impl EnvironmentHealer for GoHealer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Go
    }

    fn core(&self) -> &HealerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HealerCore {
        &mut self.core
    }

    fn analyze(&mut self, project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()> {
        let go_mod = root.join("go.mod");
        if !go_mod.is_file() {
            let command = format!("go mod init {}", project.slug());
            let issue = self
                .issue(Severity::Error, codes::GO_MODULE_MISSING, "go.mod not found")
                .with_file("go.mod")
                .with_remediation(RemediationStep::command("Initialize module", "Create go.mod", &command));
            self.core.plan(issue, Permission::CreateEnvironment, vec![RemedyAction::install(command)]);
            return Ok(());
        }

        let manifest = std::fs::read_to_string(&go_mod)?;
        let mut missing: Vec<&str> = Vec::new();
        for (_, content) in read_generated(root, generated) {
            for module in required_modules(&content) {
                if !manifest.contains(module) && !missing.contains(&module) {
                    missing.push(module);
                }
            }
        }

        if !missing.is_empty() {
            let command = format!("go get {}", missing.join(" "));
            let issue = self
                .issue(
                    Severity::Error,
                    codes::GO_TEST_DEPENDENCY_MISSING,
                    format!("Test modules not required by go.mod: {}", missing.join(", ")),
                )
                .with_file("go.mod")
                .with_remediation(RemediationStep::command("Add modules", "Require the test modules", &command));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install(command)]);
        }

        let has_requirements = manifest.lines().any(|l| l.trim_start().starts_with("require"));
        if (has_requirements || !missing.is_empty()) && !root.join("go.sum").is_file() {
            let issue = self
                .issue(Severity::Warning, codes::GO_SUM_MISSING, "go.sum not found")
                .with_file("go.sum")
                .with_remediation(RemediationStep::command("Tidy module", "Resolve module checksums", "go mod tidy"));
            self.core.plan(issue, Permission::InstallDependencies, vec![RemedyAction::install("go mod tidy")]);
        }

        Ok(())
    }
}
