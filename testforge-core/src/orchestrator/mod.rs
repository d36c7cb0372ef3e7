//! Job orchestration
//!
//! Drives one job through `INIT -> CLONE -> ANALYZE -> GENERATE -> ENV_HEAL ->
//! EXECUTE -> REFINE -> FINALIZE -> COMPLETE`. Stages run project by project
//! and a stage finishes for every project before the next one starts. A
//! project that fails in a stage gets a job-level error and an issue, and the
//! remaining projects carry on.

pub mod state;

pub use state::JobStateMachine;

use crate::adapter::{EcosystemAdapter, StandardAdapter};
use crate::analysis::ProjectAnalyzer;
use crate::config::Config;
use crate::errors::{Result, TestForgeError};
use crate::executor::{ExecutionOutcome, ExecutionRequest, TestExecutor, discover};
use crate::generator::{GenerationRequest, TestGenerator};
use crate::healer::{EnvironmentHealer, healer_for};
use crate::model::{
    CoverageArtifact, EnvironmentIssue, Findings, JobResult, JobState, JobStatus, JobSummary,
    ProjectDescriptor, Severity, Stage, SuiteStatus, TestCategory, TestRunResult, TestSuiteResult, codes,
};
use crate::repo;
use crate::runner::{CommandRunner, LogSink};
use crate::validator::ArtifactValidator;
use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything the orchestrator owns for one project while the job runs
struct ProjectRun {
    project: ProjectDescriptor,
    root: PathBuf,
    adapter: StandardAdapter,
    healer: Box<dyn EnvironmentHealer>,
    findings: Findings,
    generated: Vec<PathBuf>,
    suites: Vec<TestSuiteResult>,
    coverage: Option<CoverageArtifact>,
    errors: Vec<String>,
}

impl ProjectRun {
    /// Generated files plus existing tests of every enabled category
    fn test_files(&self, config: &Config) -> Vec<PathBuf> {
        let mut files = self.generated.clone();
        for category in config.enabled_categories() {
            let dir = self.adapter.test_dir(&self.project, category);
            for file in discover(&self.root, &dir, self.adapter.discovery_glob(category)) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }

    fn failed_categories(&self) -> Vec<TestCategory> {
        self.suites.iter().filter(|s| s.status == SuiteStatus::Failed).map(|s| s.category).collect()
    }

    fn record_failure(&mut self, stage: JobState, err: TestForgeError) {
        let (label, code, issue_stage) = match stage {
            JobState::Generate => ("generation", codes::GENERATION_FAILED, Stage::Generation),
            JobState::EnvHeal => ("environment healing", codes::ENV_HEAL_FAILED, Stage::EnvSetup),
            JobState::Refine => ("refinement", codes::EXECUTION_FAILED, Stage::Execution),
            _ => ("execution", codes::EXECUTION_FAILED, Stage::Execution),
        };
        error!("{}: {} failed: {}", self.project.name, label, err);
        self.errors.push(format!("{}: {} failed: {}", self.project.name, label, err));
        self.findings.report(EnvironmentIssue::new(
            &self.project.name,
            issue_stage,
            Severity::Error,
            code,
            format!("{label} failed: {err}"),
        ));
    }

    fn into_result(self) -> (TestRunResult, Vec<String>) {
        let result = TestRunResult::new(self.project, self.suites, self.findings, self.generated, self.coverage);
        (result, self.errors)
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    generator: Arc<dyn TestGenerator>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>, generator: Arc<dyn TestGenerator>) -> Self {
        Self { config, runner, generator }
    }

    /// Run a whole job. Never fails: every error ends up in the result.
    pub async fn execute(&self, source: &str) -> JobResult {
        let job_id = new_job_id();
        let started_at = Utc::now();
        let logs = LogSink::new(&self.config.artifacts_dir, &job_id);
        let mut machine = JobStateMachine::new();
        info!("Starting job {} for {}", job_id, source);

        let runs = match self.run_stages(source, &job_id, &logs, &mut machine).await {
            Ok(runs) => runs,
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                let message = e.to_string();
                if let Err(e) = machine.fail(&message) {
                    debug!("{}", e);
                }
                let mut summary = JobSummary::compute(&[], &[], &[]);
                summary.reason = Some(message.clone());
                return JobResult {
                    job_id,
                    source: source.to_string(),
                    status: JobStatus::Failed,
                    started_at,
                    finished_at: Utc::now(),
                    projects: Vec::new(),
                    issues: Vec::new(),
                    actions: Vec::new(),
                    errors: vec![message],
                    summary,
                    stages: machine.into_history(),
                };
            }
        };

        let mut job_findings = Findings::new();
        let mut errors = Vec::new();
        let projects: Vec<TestRunResult> = runs
            .into_iter()
            .map(|run| {
                job_findings.merge(run.findings.clone());
                let (result, project_errors) = run.into_result();
                errors.extend(project_errors);
                result
            })
            .collect();

        let (issues, actions) = job_findings.into_parts();
        let status = JobResult::derive_status(&projects, &issues);
        let summary = JobSummary::compute(&projects, &issues, &actions);
        if let Err(e) = machine.transition_to(JobState::Complete) {
            debug!("{}", e);
        }
        info!(
            "Job {} finished: {:?} ({} tests, {} failed, {} issue(s))",
            job_id, status, summary.total_tests, summary.tests_failed, summary.total_issues
        );

        JobResult {
            job_id,
            source: source.to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            projects,
            issues,
            actions,
            errors,
            summary,
            stages: machine.into_history(),
        }
    }

    async fn run_stages(
        &self,
        source: &str,
        job_id: &str,
        logs: &LogSink,
        machine: &mut JobStateMachine,
    ) -> Result<Vec<ProjectRun>> {
        machine.transition_to(JobState::Clone)?;
        let repo_root = repo::prepare(
            source,
            &self.config.workspace_dir,
            job_id,
            self.runner.as_ref(),
            self.config.timeouts.repo_clone(),
        )
        .await?;

        machine.transition_to(JobState::Analyze)?;
        let projects = ProjectAnalyzer::new().analyze(&repo_root)?;
        if projects.is_empty() {
            return Err(TestForgeError::analysis("no projects detected"));
        }

        let mut runs: Vec<ProjectRun> = projects
            .into_iter()
            .map(|project| {
                let root = project.root_in(&repo_root);
                let healer = healer_for(&project, &self.config.auto_fix, &self.config.timeouts, self.runner.clone());
                ProjectRun {
                    adapter: StandardAdapter::for_project(&project),
                    root,
                    healer,
                    project,
                    findings: Findings::new(),
                    generated: Vec::new(),
                    suites: Vec::new(),
                    coverage: None,
                    errors: Vec::new(),
                }
            })
            .collect();

        for stage in [JobState::Generate, JobState::EnvHeal, JobState::Execute] {
            machine.transition_to(stage)?;
            self.fan_out(stage, &mut runs, logs).await;
        }

        machine.transition_to(JobState::Refine)?;
        if self.config.refine {
            self.fan_out(JobState::Refine, &mut runs, logs).await;
        }

        machine.transition_to(JobState::Finalize)?;
        Ok(runs)
    }

    /// Run one stage for every project, serially unless configured otherwise
    async fn fan_out(&self, stage: JobState, runs: &mut [ProjectRun], logs: &LogSink) {
        if self.config.parallel {
            join_all(runs.iter_mut().map(|run| self.run_stage(stage, run, logs))).await;
        } else {
            for run in runs.iter_mut() {
                self.run_stage(stage, run, logs).await;
            }
        }
    }

    async fn run_stage(&self, stage: JobState, run: &mut ProjectRun, logs: &LogSink) {
        debug!("{} for {}", stage, run.project.name);
        let result = match stage {
            JobState::Generate => self.generate(run, logs).await,
            JobState::EnvHeal => self.heal(run).await,
            JobState::Execute => self.execute_project(run, logs).await,
            JobState::Refine => self.refine(run, logs).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            run.record_failure(stage, e);
        }
    }

    async fn generate(&self, run: &mut ProjectRun, logs: &LogSink) -> Result<()> {
        let categories = self.config.enabled_categories();
        let request = GenerationRequest {
            project: &run.project,
            root: &run.root,
            categories: &categories,
            adapter: &run.adapter,
        };
        let candidates = self.generator.generate(&request).await?;
        info!("{} candidate test file(s) for {}", candidates.len(), run.project.name);

        let quarantine = logs.project_dir(&run.project.slug()).join("quarantine");
        let validator = ArtifactValidator::new(&self.config, self.runner.as_ref(), quarantine);
        let outcome = validator.process(&run.project, &run.root, candidates).await?;

        run.generated.extend(outcome.written);
        run.findings.merge(outcome.findings);
        Ok(())
    }

    async fn heal(&self, run: &mut ProjectRun) -> Result<()> {
        let files = run.test_files(&self.config);
        run.healer.analyze(&run.project, &run.root, &files)?;
        run.healer.heal(&run.root).await?;
        run.findings.merge(run.healer.take_findings());
        Ok(())
    }

    async fn run_executor(
        &self,
        run: &mut ProjectRun,
        logs: &LogSink,
        categories: &[TestCategory],
        run_build: bool,
    ) -> Result<ExecutionOutcome> {
        let executor = TestExecutor::new(&self.config, self.runner.as_ref(), logs, self.generator.as_ref());
        executor
            .execute(ExecutionRequest {
                project: &run.project,
                root: &run.root,
                adapter: &run.adapter,
                categories,
                healer: run.healer.as_mut(),
                run_build,
            })
            .await
    }

    async fn execute_project(&self, run: &mut ProjectRun, logs: &LogSink) -> Result<()> {
        let outcome = self.run_executor(run, logs, &TestCategory::ALL, true).await?;
        run.suites = outcome.suites;
        run.coverage = outcome.coverage;
        run.findings.merge(outcome.findings);
        Ok(())
    }

    /// One extra heal pass for projects with failed suites; the failed
    /// categories run again only if a remediation succeeded.
    async fn refine(&self, run: &mut ProjectRun, logs: &LogSink) -> Result<()> {
        let failed = run.failed_categories();
        if failed.is_empty() {
            return Ok(());
        }

        let mut healer = healer_for(&run.project, &self.config.auto_fix, &self.config.timeouts, self.runner.clone());
        let files = run.test_files(&self.config);
        healer.analyze(&run.project, &run.root, &files)?;
        let before = healer.core().fixed_count();
        healer.heal(&run.root).await?;
        let repaired = healer.core().fixed_count() > before;
        run.findings.merge(healer.take_findings());

        if !repaired {
            debug!("Nothing new to repair for {}", run.project.name);
            return Ok(());
        }

        info!("Re-running {} failed categor(ies) for {}", failed.len(), run.project.name);
        run.healer = healer;
        let outcome = self.run_executor(run, logs, &failed, false).await?;
        for suite in outcome.suites {
            if let Some(slot) = run.suites.iter_mut().find(|s| s.category == suite.category) {
                *slot = suite;
            }
        }
        if outcome.coverage.is_some() {
            run.coverage = outcome.coverage;
        }
        run.findings.merge(outcome.findings);
        Ok(())
    }
}

fn new_job_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::CandidateFile;
    use crate::runner::CommandOutput;
    use crate::testing::{ScriptedRunner, StubGenerator};
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config(artifacts: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.artifacts_dir = artifacts.to_path_buf();
        config.workspace_dir = artifacts.join("workspace");
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_failed_project_does_not_void_others() {
        let repo = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();
        write(repo.path(), "a/requirements.txt", "");
        write(repo.path(), "b/requirements.txt", "");

        let generator = StubGenerator::new().failing_for("a").with_files("b", vec![CandidateFile {
            path: PathBuf::from("tests/unit/test_orders.py"),
            content: "def test_orders():\n    assert True\n".to_string(),
            category: TestCategory::Unit,
        }]);
        let runner = ScriptedRunner::new()
            .on("--collect-only", CommandOutput::new(0, "1 test collected in 0.01s", ""))
            .on("pytest tests/unit", CommandOutput::new(0, "=== 1 passed in 0.02s ===", ""));

        let orchestrator = Orchestrator::new(config(artifacts.path()), Arc::new(runner), Arc::new(generator));
        let result = orchestrator.execute(repo.path().to_str().unwrap()).await;

        assert_eq!(result.projects.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("a: generation failed"));

        let b = result.projects.iter().find(|p| p.project.name == "b").unwrap();
        assert_eq!(b.generated_files, vec![PathBuf::from("tests/unit/test_orders.py")]);
        assert_eq!(b.suites[0].status, SuiteStatus::Passed);
        assert_eq!(b.tests_run(), 1);

        assert!(result.issues.iter().any(|i| i.code == codes::GENERATION_FAILED && i.project == "a"));
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.stages.last().map(|t| t.to), Some(JobState::Complete));
    }

    #[tokio::test]
    async fn test_missing_repository_fails_job() {
        let artifacts = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            config(artifacts.path()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(StubGenerator::new()),
        );

        let result = orchestrator.execute("/definitely/not/a/repo").await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.projects.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.stages.last().map(|t| t.to), Some(JobState::Failed));
        assert!(result.summary.reason.is_some());
    }

    #[tokio::test]
    async fn test_no_projects_is_initialization_failure() {
        let repo = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();
        write(repo.path(), "README.md", "# nothing to test\n");
        let orchestrator = Orchestrator::new(
            config(artifacts.path()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(StubGenerator::new()),
        );

        let result = orchestrator.execute(repo.path().to_str().unwrap()).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.projects.is_empty());
        assert!(result.summary.reason.unwrap().contains("no projects detected"));
    }

    #[tokio::test]
    async fn test_refine_reruns_after_repair() {
        let repo = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();
        write(repo.path(), "go.mod", "module example.com/svc\n\ngo 1.22\n\nrequire github.com/google/uuid v1.6.0\n");
        write(repo.path(), "cart_test.go", "package svc\n");

        let runner = Arc::new(
            ScriptedRunner::new()
                .on_sequence("go mod tidy", vec![
                    CommandOutput::new(1, "", "network unreachable"),
                    CommandOutput::new(0, "", ""),
                ])
                .on_sequence("go test -v ./...", vec![
                    CommandOutput::new(1, "--- FAIL: TestCart (0.00s)\nFAIL", ""),
                    CommandOutput::new(0, "--- PASS: TestCart (0.00s)\nPASS", ""),
                ]),
        );
        let orchestrator = Orchestrator::new(config(artifacts.path()), runner.clone(), Arc::new(StubGenerator::new()));

        let result = orchestrator.execute(repo.path().to_str().unwrap()).await;

        assert_eq!(runner.count("go mod tidy"), 2);
        assert_eq!(runner.count("go test -v ./..."), 2);
        let project = &result.projects[0];
        assert_eq!(project.suites[0].status, SuiteStatus::Passed);
        let sum = result.issues.iter().find(|i| i.code == codes::GO_SUM_MISSING).unwrap();
        assert!(sum.auto_fixed);
        assert_eq!(result.status, JobStatus::Success);
    }
}
