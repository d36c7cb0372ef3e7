//! Test execution per project and category
//!
//! Builds once, then for every requested category: discover test files, let
//! the auto-fix loop make discovery work, run the suite and turn the output
//! into a [`TestSuiteResult`]. Categories are independent; a failed build or
//! a failed category never stops the next one.

pub mod failure;

use crate::adapter::EcosystemAdapter;
use crate::analysis::is_ignored_dir;
use crate::autofix::{AutoFixLoop, FixContext, profile_for};
use crate::config::Config;
use crate::errors::Result;
use crate::generator::TestGenerator;
use crate::healer::EnvironmentHealer;
use crate::model::{
    CoverageArtifact, EnvironmentIssue, Findings, ProjectDescriptor, RemediationStep, Severity,
    Stage, SuiteStatus, TestCategory, TestSuiteResult, codes,
};
use crate::runner::{CommandOutput, CommandRunner, LogSink};
use globset::Glob;
use regex_utils::counts;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Error lines kept per suite
pub const MAX_ERROR_LINES: usize = 20;

/// Captured output kept inline; the full text is in the logs
const MAX_INLINE_OUTPUT: usize = 8_000;

/// Files pytest collects but never treats as tests
const NON_TEST_FILES: &[&str] = &["__init__.py", "conftest.py"];

pub struct ExecutionRequest<'a> {
    pub project: &'a ProjectDescriptor,
    pub root: &'a Path,
    pub adapter: &'a dyn EcosystemAdapter,
    pub categories: &'a [TestCategory],
    /// Receives the auto-fix loop's issues and actions
    pub healer: &'a mut dyn EnvironmentHealer,
    pub run_build: bool,
}

#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub suites: Vec<TestSuiteResult>,
    pub findings: Findings,
    pub coverage: Option<CoverageArtifact>,
}

pub struct TestExecutor<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    logs: &'a LogSink,
    generator: &'a dyn TestGenerator,
}

impl<'a> TestExecutor<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        logs: &'a LogSink,
        generator: &'a dyn TestGenerator,
    ) -> Self {
        Self { config, runner, logs, generator }
    }

    pub async fn execute(&self, mut request: ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let mut outcome = ExecutionOutcome::default();
        let project = request.project;

        if request.run_build {
            if let Some(command) = request.adapter.build_command(project, request.root) {
                self.build(project, request.root, &command, &mut outcome.findings).await;
            }
        }

        for &category in request.categories {
            if !self.config.categories.is_enabled(category) {
                debug!("{} {} tests disabled", project.name, category);
                outcome.suites.push(TestSuiteResult::skipped(category, "Category disabled by configuration"));
                continue;
            }
            let suite = self.run_category(&mut request, category, &mut outcome.findings).await;
            info!(
                "{} {}: {:?} ({} run, {} failed)",
                project.name, category, suite.status, suite.tests_run, suite.tests_failed
            );
            outcome.suites.push(suite);
        }

        if self.config.coverage && outcome.suites.iter().any(|s| s.tests_run > 0) {
            outcome.coverage = self.coverage(&request).await;
        }

        outcome.findings.merge(request.healer.take_findings());
        Ok(outcome)
    }

    async fn build(&self, project: &ProjectDescriptor, root: &Path, command: &str, findings: &mut Findings) {
        info!("Building {}: {}", project.name, command);
        let detail = match self.runner.execute(command, root, self.config.timeouts.build()).await {
            Ok(output) => {
                self.save(project, "build", &output).await;
                if output.success() {
                    return;
                }
                failure::error_lines(&output.combined(), MAX_ERROR_LINES).join("\n")
            }
            Err(e) => e.to_string(),
        };

        // Categories still run; a broken build shows up as their failures too
        warn!("Build failed for {}", project.name);
        findings.report(
            EnvironmentIssue::new(&project.name, Stage::Execution, Severity::Warning, codes::BUILD_FAILED, "Build step failed")
                .with_details(detail)
                .with_remediation(RemediationStep::command("Build manually", "Fix the build before running tests", command)),
        );
    }

    async fn run_category(
        &self,
        request: &mut ExecutionRequest<'_>,
        category: TestCategory,
        findings: &mut Findings,
    ) -> TestSuiteResult {
        let project = request.project;
        let root = request.root;
        let test_dir = request.adapter.test_dir(project, category);
        let files = discover(root, &test_dir, request.adapter.discovery_glob(category));

        if files.is_empty() {
            findings.report(no_tests_found(project, &test_dir, "No test files found"));
            return TestSuiteResult::skipped(category, format!("No test files in {}", test_dir.display()));
        }
        debug!("{} {}: {} test file(s)", project.name, category, files.len());

        if self.config.auto_fix.enabled {
            if let Some(profile) = profile_for(project) {
                let mut ctx = FixContext {
                    project,
                    root,
                    test_dir: &test_dir,
                    test_files: &files,
                    healer: &mut *request.healer,
                    generator: self.generator,
                    config: self.config,
                };
                let outcome = AutoFixLoop::new(profile.as_ref(), self.runner, self.config.auto_fix.max_iterations)
                    .run(&mut ctx)
                    .await;
                debug!("{} {} auto-fix: {:?}", project.name, category, outcome.history);
            }
        }

        let command = request.adapter.test_command(project, root, category);
        info!("Running {} {} tests: {}", project.name, category, command);
        let started = Instant::now();

        let output = match self.runner.execute(&command, root, self.config.timeouts.test_run()).await {
            Ok(output) => output,
            Err(e) => {
                let (code, message) = if e.is_timeout() {
                    (codes::TEST_EXECUTION_TIMEOUT, "Test run timed out")
                } else {
                    (codes::TEST_EXECUTION_FAILED, "Test command could not be run")
                };
                warn!("{} {} tests: {}", project.name, category, e);
                findings.report(
                    EnvironmentIssue::new(&project.name, Stage::Execution, Severity::Error, code, message)
                        .with_file(&test_dir)
                        .with_details(e.to_string())
                        .with_remediation(RemediationStep::command("Run the tests manually", "Check why the suite does not finish", &command)),
                );
                return TestSuiteResult {
                    command,
                    status: SuiteStatus::Failed,
                    duration_ms: started.elapsed().as_millis() as u64,
                    output: e.to_string(),
                    errors: vec![e.to_string()],
                    ..TestSuiteResult::skipped(category, "")
                };
            }
        };

        let logs = self.save(project, category.as_str(), &output).await;
        let combined = output.combined();
        let parsed = counts::for_runner(request.adapter.runner_name(project, root), &combined);

        let mut suite = TestSuiteResult {
            command: command.clone(),
            exit_code: Some(output.exit_code),
            duration_ms: started.elapsed().as_millis() as u64,
            output: tail(&combined, MAX_INLINE_OUTPUT),
            errors: failure::error_lines(&combined, MAX_ERROR_LINES),
            stdout_log: logs.as_ref().map(|l| l.stdout.clone()),
            stderr_log: logs.map(|l| l.stderr),
            ..TestSuiteResult::skipped(category, "")
        };

        match parsed {
            Some(c) if c.run > 0 => {
                suite.tests_run = c.run;
                suite.tests_passed = c.passed;
                suite.tests_failed = c.failed;
                suite.status = if c.failed == 0 && output.success() { SuiteStatus::Passed } else { SuiteStatus::Failed };
            }
            Some(_) if output.success() => {
                findings.report(no_tests_found(project, &test_dir, "The runner collected no tests"));
                suite.status = SuiteStatus::Skipped;
            }
            None if output.success() => {
                findings.report(
                    EnvironmentIssue::new(
                        &project.name,
                        Stage::Execution,
                        Severity::Info,
                        codes::TEST_COUNTS_UNPARSED,
                        "Suite passed but its test counts could not be read",
                    )
                    .with_file(&test_dir),
                );
                suite.status = SuiteStatus::Passed;
            }
            _ => {
                let issue = failure::analyze(&project.name, &test_dir, &command, &combined);
                warn!("{} {} tests failed before running: {}", project.name, category, issue.code);
                findings.report(issue);
                suite.status = SuiteStatus::Failed;
            }
        }

        suite
    }

    async fn coverage(&self, request: &ExecutionRequest<'_>) -> Option<CoverageArtifact> {
        let command = request.adapter.coverage_command(request.project, request.root)?;
        info!("Collecting coverage for {}: {}", request.project.name, command);

        match self.runner.execute(&command, request.root, self.config.timeouts.coverage()).await {
            Ok(output) => {
                let logs = self.save(request.project, "coverage", &output).await;
                Some(CoverageArtifact { command, exit_code: Some(output.exit_code), log_path: logs.map(|l| l.stdout) })
            }
            Err(e) => {
                warn!("Coverage for {} failed: {}", request.project.name, e);
                Some(CoverageArtifact { command, exit_code: None, log_path: None })
            }
        }
    }

    async fn save(&self, project: &ProjectDescriptor, category: &str, output: &CommandOutput) -> Option<crate::runner::SavedLogs> {
        match self.logs.save_output(&project.slug(), category, output).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                warn!("Could not save {} logs for {}: {}", category, project.name, e);
                None
            }
        }
    }
}

fn no_tests_found(project: &ProjectDescriptor, test_dir: &Path, message: &str) -> EnvironmentIssue {
    EnvironmentIssue::new(&project.name, Stage::Execution, Severity::Warning, codes::NO_TESTS_FOUND, message)
        .with_file(test_dir)
        .with_remediation(RemediationStep::file(
            "Add tests",
            "Generate or write tests in the expected directory",
            test_dir,
        ))
}

/// Test files under `test_dir` matching `glob`, relative to `root`, sorted
pub fn discover(root: &Path, test_dir: &Path, glob: &str) -> Vec<PathBuf> {
    let dir = root.join(test_dir);
    if !dir.is_dir() {
        return Vec::new();
    }
    let matcher = match Glob::new(glob) {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            warn!("Invalid discovery glob {}: {}", glob, e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = WalkDir::new(&dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_ignored_dir(e.file_name())))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_str().is_some_and(|n| NON_TEST_FILES.contains(&n)))
        .filter(|e| e.path().strip_prefix(&dir).is_ok_and(|rel| matcher.is_match(rel)))
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Last `max` bytes of `text`, on a char boundary
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
