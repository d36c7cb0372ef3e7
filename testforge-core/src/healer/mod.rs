//! Environment healing
//!
//! One healer per ecosystem. `analyze` inspects a project read-only and plans
//! remedies; `heal` executes the permitted ones and marks an issue fixed only
//! after its remedy succeeded. A failed remedy never aborts the others.

pub mod csharp;
pub mod go;
pub mod java;
pub mod node;
pub mod python;

use crate::config::{AutoFixConfig, TimeoutsConfig};
use crate::errors::Result;
use crate::model::{
    AutoFixAction, Ecosystem, EnvironmentIssue, Findings, IssueKey, ProjectDescriptor,
};
use crate::runner::CommandRunner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a remedy is allowed to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    CreateEnvironment,
    InstallDependencies,
    UpdateConfig,
}

/// Independently togglable remediation permissions
#[derive(Debug, Clone, Copy)]
pub struct HealPolicy {
    pub enabled: bool,
    pub install_dependencies: bool,
    pub update_config: bool,
    pub create_environment: bool,
}

impl HealPolicy {
    pub fn allows(&self, permission: Permission) -> bool {
        self.enabled
            && match permission {
                Permission::CreateEnvironment => self.create_environment,
                Permission::InstallDependencies => self.install_dependencies,
                Permission::UpdateConfig => self.update_config,
            }
    }
}

impl From<&AutoFixConfig> for HealPolicy {
    fn from(config: &AutoFixConfig) -> Self {
        Self {
            enabled: config.enabled,
            install_dependencies: config.install_dependencies,
            update_config: config.update_config,
            create_environment: config.create_environment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Install,
    Build,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemedyAction {
    Command { command: String, timeout: TimeoutKind },
    /// Create or replace a file, path relative to the project root
    WriteFile { path: PathBuf, content: String },
    /// Rewrite an existing config file at heal time, keeping its other content
    Edit { path: PathBuf, edit: ConfigEdit },
}

/// In-place config changes applied to the file's current content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdit {
    /// Add pytest `python_files` patterns; existing ones are kept
    PytestFilePatterns(Vec<String>),
    /// Set pytest `pythonpath` when absent
    PytestPythonpath(Vec<String>),
}

impl ConfigEdit {
    pub fn apply(&self, path: &Path, text: &str) -> String {
        match self {
            Self::PytestFilePatterns(patterns) => python::add_file_patterns(path, text, patterns),
            Self::PytestPythonpath(paths) => python::set_pythonpath(path, text, paths),
        }
    }
}

impl RemedyAction {
    pub fn install(command: impl Into<String>) -> Self {
        Self::Command { command: command.into(), timeout: TimeoutKind::Install }
    }

    pub fn write(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self::WriteFile { path: path.into(), content: content.into() }
    }

    fn describe(&self) -> String {
        match self {
            Self::Command { command, .. } => command.clone(),
            Self::WriteFile { path, .. } => format!("write {}", path.display()),
            Self::Edit { path, .. } => format!("edit {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
struct Remedy {
    key: IssueKey,
    permission: Permission,
    actions: Vec<RemedyAction>,
    attempted: bool,
}

/// State shared by every ecosystem healer
pub struct HealerCore {
    project: String,
    findings: Findings,
    remedies: Vec<Remedy>,
    policy: HealPolicy,
    runner: Arc<dyn CommandRunner>,
    timeouts: TimeoutsConfig,
}

impl HealerCore {
    pub fn new(
        project: impl Into<String>,
        policy: HealPolicy,
        runner: Arc<dyn CommandRunner>,
        timeouts: TimeoutsConfig,
    ) -> Self {
        Self {
            project: project.into(),
            findings: Findings::new(),
            remedies: Vec::new(),
            policy,
            runner,
            timeouts,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn policy(&self) -> &HealPolicy {
        &self.policy
    }

    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    /// Record an issue without an executable remedy
    pub fn report(&mut self, issue: EnvironmentIssue) -> bool {
        self.findings.report(issue)
    }

    /// Record an issue and the actions that fix it. Ignored for known keys.
    pub fn plan(&mut self, issue: EnvironmentIssue, permission: Permission, actions: Vec<RemedyAction>) -> bool {
        let key = issue.key();
        if !self.findings.report(issue) {
            return false;
        }
        debug!("Planned {:?} remedy for {}", permission, key.1);
        self.remedies.push(Remedy { key, permission, actions, attempted: false });
        true
    }

    pub fn is_fixed(&self, key: &IssueKey) -> bool {
        self.findings.get(key).is_some_and(|i| i.auto_fixed)
    }

    /// Whether a remedy for `key` exists and has not been tried yet
    pub fn has_pending_remedy(&self, key: &IssueKey) -> bool {
        self.remedies.iter().any(|r| &r.key == key && !r.attempted)
    }

    /// Execute every permitted, untried remedy. Environment creation runs
    /// first, then installs, then config edits.
    pub async fn heal(&mut self, root: &Path) -> Result<()> {
        let mut order: Vec<usize> = (0..self.remedies.len()).collect();
        order.sort_by_key(|&i| self.remedies[i].permission);

        for idx in order {
            let remedy = &self.remedies[idx];
            if remedy.attempted || self.is_fixed(&remedy.key) {
                continue;
            }
            if !self.policy.allows(remedy.permission) {
                debug!("Remedy for {} not permitted ({:?})", remedy.key.1, remedy.permission);
                continue;
            }

            let key = remedy.key.clone();
            let actions = remedy.actions.clone();
            self.remedies[idx].attempted = true;

            if self.run_actions(root, &key, &actions).await {
                info!("Fixed {} for {}", key.1, self.project);
                self.findings.mark_fixed(&key);
            } else {
                warn!("Remediation of {} failed for {}", key.1, self.project);
            }
        }

        Ok(())
    }

    /// Report `issue` and run its remedy right away. `None` permission means
    /// the actions only touch generated test files. Returns whether every
    /// action succeeded; the issue is marked fixed only then.
    pub async fn remediate_now(
        &mut self,
        root: &Path,
        issue: EnvironmentIssue,
        permission: Option<Permission>,
        actions: Vec<RemedyAction>,
    ) -> bool {
        let key = issue.key();
        self.findings.report(issue);
        if let Some(permission) = permission {
            if !self.policy.allows(permission) {
                debug!("Immediate remedy for {} not permitted ({:?})", key.1, permission);
                return false;
            }
        }
        let ok = self.run_actions(root, &key, &actions).await;
        if ok {
            info!("Fixed {} for {}", key.1, self.project);
            self.findings.mark_fixed(&key);
        }
        ok
    }

    /// Number of issues confirmed fixed so far
    pub fn fixed_count(&self) -> usize {
        self.findings.issues().iter().filter(|i| i.auto_fixed).count()
    }

    async fn run_actions(&mut self, root: &Path, key: &IssueKey, actions: &[RemedyAction]) -> bool {
        for action in actions {
            let (ok, stdout, stderr) = self.apply(root, action).await;
            self.findings.record(AutoFixAction::record(
                &self.project,
                root,
                action.describe(),
                format!("Remediate {}", key.1),
                ok,
                stdout,
                stderr,
            ));
            if !ok {
                return false;
            }
        }
        true
    }

    async fn apply(&self, root: &Path, action: &RemedyAction) -> (bool, String, String) {
        match action {
            RemedyAction::Command { command, timeout } => {
                let timeout = match timeout {
                    TimeoutKind::Install => self.timeouts.install(),
                    TimeoutKind::Build => self.timeouts.build(),
                };
                info!("Running remediation `{}` in {}", command, root.display());
                match self.runner.execute(command, root, timeout).await {
                    Ok(output) => (output.success(), output.stdout, output.stderr),
                    Err(e) => (false, String::new(), e.to_string()),
                }
            }
            RemedyAction::WriteFile { path, content } => {
                let target = root.join(path);
                info!("Writing {}", target.display());
                let result = async {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, content).await
                }
                .await;
                match result {
                    Ok(()) => (true, format!("wrote {}", path.display()), String::new()),
                    Err(e) => (false, String::new(), e.to_string()),
                }
            }
            RemedyAction::Edit { path, edit } => {
                let target = root.join(path);
                let current = tokio::fs::read_to_string(&target).await.unwrap_or_default();
                let updated = edit.apply(path, &current);
                info!("Updating {}", target.display());
                match tokio::fs::write(&target, updated).await {
                    Ok(()) => (true, format!("updated {}", path.display()), String::new()),
                    Err(e) => (false, String::new(), e.to_string()),
                }
            }
        }
    }

    pub fn take_findings(&mut self) -> Findings {
        std::mem::take(&mut self.findings)
    }

    pub fn install_timeout(&self) -> Duration {
        self.timeouts.install()
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }
}

/// Per-ecosystem diagnose-and-repair capability
#[async_trait]
pub trait EnvironmentHealer: Send {
    fn ecosystem(&self) -> Ecosystem;

    fn core(&self) -> &HealerCore;

    fn core_mut(&mut self) -> &mut HealerCore;

    /// Read-only inspection; repeated calls never duplicate issues
    fn analyze(&mut self, project: &ProjectDescriptor, root: &Path, generated: &[PathBuf]) -> Result<()>;

    async fn heal(&mut self, root: &Path) -> Result<()> {
        self.core_mut().heal(root).await
    }

    fn issues(&self) -> &[EnvironmentIssue] {
        self.core().findings().issues()
    }

    fn actions(&self) -> &[AutoFixAction] {
        self.core().findings().actions()
    }

    fn take_findings(&mut self) -> Findings {
        self.core_mut().take_findings()
    }
}

/// Healer for the project's ecosystem
pub fn healer_for(
    project: &ProjectDescriptor,
    config: &AutoFixConfig,
    timeouts: &TimeoutsConfig,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn EnvironmentHealer> {
    let core = HealerCore::new(&project.name, HealPolicy::from(config), runner, timeouts.clone());
    match project.ecosystem() {
        Ecosystem::Node => Box::new(node::NodeHealer::new(core)),
        Ecosystem::Python => Box::new(python::PythonHealer::new(core)),
        Ecosystem::Java => Box::new(java::JavaHealer::new(core)),
        Ecosystem::Go => Box::new(go::GoHealer::new(core)),
        Ecosystem::DotNet => Box::new(csharp::CSharpHealer::new(core)),
    }
}

/// Read generated files that exist, with their relative paths
pub(crate) fn read_generated(root: &Path, generated: &[PathBuf]) -> Vec<(PathBuf, String)> {
    generated
        .iter()
        .filter_map(|rel| std::fs::read_to_string(root.join(rel)).ok().map(|c| (rel.clone(), c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, Stage, codes};
    use crate::runner::CommandOutput;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn issue(code: &str) -> EnvironmentIssue {
        EnvironmentIssue::new("api", Stage::EnvSetup, Severity::Error, code, "broken")
    }

    fn core(runner: Arc<ScriptedRunner>, policy: HealPolicy) -> HealerCore {
        HealerCore::new("api", policy, runner, TimeoutsConfig::default())
    }

    fn allow_all() -> HealPolicy {
        HealPolicy::from(&AutoFixConfig::default())
    }

    #[tokio::test]
    async fn test_failed_remedy_is_fail_soft() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("pip install", CommandOutput::new(1, "", "no network")));
        let mut core = core(runner.clone(), allow_all());

        core.plan(issue(codes::PYTEST_NOT_INSTALLED), Permission::InstallDependencies, vec![
            RemedyAction::install("python3 -m pip install pytest"),
        ]);
        core.plan(issue(codes::PYTHON_VENV_MISSING), Permission::CreateEnvironment, vec![
            RemedyAction::install("python3 -m venv .venv"),
        ]);
        core.heal(temp.path()).await.unwrap();

        let calls: Vec<String> = runner.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(calls, vec!["python3 -m venv .venv", "python3 -m pip install pytest"]);

        let findings = core.findings();
        assert_eq!(findings.actions().len(), 2);
        assert!(findings.issues().iter().find(|i| i.code == codes::PYTHON_VENV_MISSING).unwrap().auto_fixed);
        let pytest = findings.issues().iter().find(|i| i.code == codes::PYTEST_NOT_INSTALLED).unwrap();
        assert!(!pytest.auto_fixed);
        assert!(!findings.actions()[1].success);
    }

    #[tokio::test]
    async fn test_policy_blocks_remedy() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut policy = allow_all();
        policy.update_config = false;
        let mut core = core(runner.clone(), policy);

        core.plan(issue(codes::PYTEST_CONFIG_MISSING), Permission::UpdateConfig, vec![
            RemedyAction::write("pytest.ini", "[pytest]\n"),
        ]);
        core.heal(temp.path()).await.unwrap();

        assert!(!temp.path().join("pytest.ini").exists());
        assert!(core.findings().actions().is_empty());
        assert!(!core.findings().issues()[0].auto_fixed);
    }

    #[tokio::test]
    async fn test_write_file_and_no_retry() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut core = core(runner, allow_all());

        core.plan(issue(codes::JEST_CONFIG_MISSING), Permission::UpdateConfig, vec![
            RemedyAction::write("jest.config.js", "module.exports = {};\n"),
        ]);
        assert!(!core.plan(issue(codes::JEST_CONFIG_MISSING), Permission::UpdateConfig, vec![]));

        core.heal(temp.path()).await.unwrap();
        core.heal(temp.path()).await.unwrap();

        assert!(temp.path().join("jest.config.js").is_file());
        assert_eq!(core.findings().actions().len(), 1);
        assert!(core.findings().issues()[0].auto_fixed);
    }
}
