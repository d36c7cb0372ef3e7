//! Data model shared by every stage of a job
//!
//! Projects, issues, remediation records and the per-suite, per-project and
//! per-job results. Everything here is serialized as-is into the job report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable issue codes, used for display and for deduplication
pub mod codes {
    // Artifact validation
    pub const IMPORT_CORRECTED: &str = "IMPORT_CORRECTED";
    pub const UNRESOLVED_IMPORTS: &str = "UNRESOLVED_IMPORTS";
    pub const GENERATED_TEST_SKIPPED: &str = "GENERATED_TEST_SKIPPED";
    pub const TEST_QUALITY_GATE_FAILED: &str = "TEST_QUALITY_GATE_FAILED";
    pub const TEST_QUARANTINED: &str = "TEST_QUARANTINED";

    // Node / TypeScript
    pub const NODE_PACKAGE_JSON_MISSING: &str = "NODE_PACKAGE_JSON_MISSING";
    pub const NODE_PACKAGE_JSON_INVALID: &str = "NODE_PACKAGE_JSON_INVALID";
    pub const NODE_DEPENDENCIES_NOT_INSTALLED: &str = "NODE_DEPENDENCIES_NOT_INSTALLED";
    pub const JEST_NOT_INSTALLED: &str = "JEST_NOT_INSTALLED";
    pub const JEST_CONFIG_MISSING: &str = "JEST_CONFIG_MISSING";
    pub const ESM_DEPENDENCY_TRANSFORM_REQUIRED: &str = "ESM_DEPENDENCY_TRANSFORM_REQUIRED";
    pub const TS_TRANSFORM_MISSING: &str = "TS_TRANSFORM_MISSING";
    pub const TSCONFIG_MISSING: &str = "TSCONFIG_MISSING";

    // Python
    pub const PYTHON_VENV_MISSING: &str = "PYTHON_VENV_MISSING";
    pub const PYTEST_NOT_INSTALLED: &str = "PYTEST_NOT_INSTALLED";
    pub const PYTHON_REQUIREMENTS_NOT_INSTALLED: &str = "PYTHON_REQUIREMENTS_NOT_INSTALLED";
    pub const PYTEST_CONFIG_MISSING: &str = "PYTEST_CONFIG_MISSING";
    pub const TEST_DISCOVERY_PATTERN_MISMATCH: &str = "TEST_DISCOVERY_PATTERN_MISMATCH";
    pub const PYTHONPATH_MISCONFIGURED: &str = "PYTHONPATH_MISCONFIGURED";

    // Java
    pub const JAVA_BUILD_DESCRIPTOR_MISSING: &str = "JAVA_BUILD_DESCRIPTOR_MISSING";
    pub const JAVA_TEST_DEPENDENCY_MISSING: &str = "JAVA_TEST_DEPENDENCY_MISSING";

    // Go
    pub const GO_MODULE_MISSING: &str = "GO_MODULE_MISSING";
    pub const GO_TEST_DEPENDENCY_MISSING: &str = "GO_TEST_DEPENDENCY_MISSING";
    pub const GO_SUM_MISSING: &str = "GO_SUM_MISSING";

    // C#
    pub const DOTNET_PROJECT_MISSING: &str = "DOTNET_PROJECT_MISSING";
    pub const DOTNET_TEST_PACKAGE_MISSING: &str = "DOTNET_TEST_PACKAGE_MISSING";
    pub const DOTNET_RESTORE_REQUIRED: &str = "DOTNET_RESTORE_REQUIRED";

    // Auto-fix loop signatures
    pub const JEST_RUNNER_MISSING: &str = "JEST_RUNNER_MISSING";
    pub const RELATIVE_IMPORT_NOT_FOUND: &str = "RELATIVE_IMPORT_NOT_FOUND";
    pub const MISSING_PACKAGE: &str = "MISSING_PACKAGE";
    pub const ESM_SYNTAX_UNSUPPORTED: &str = "ESM_SYNTAX_UNSUPPORTED";
    pub const TS_SYNTAX_UNSUPPORTED: &str = "TS_SYNTAX_UNSUPPORTED";
    pub const JEST_CONFIG_INVALID: &str = "JEST_CONFIG_INVALID";
    pub const TEST_SYNTAX_ERROR: &str = "TEST_SYNTAX_ERROR";
    pub const PYTHON_MODULE_NOT_FOUND: &str = "PYTHON_MODULE_NOT_FOUND";
    pub const PYTEST_FIXTURE_NOT_FOUND: &str = "PYTEST_FIXTURE_NOT_FOUND";
    pub const MODEL_VALIDATION_ERROR: &str = "MODEL_VALIDATION_ERROR";
    pub const PYTHON_IMPORT_ERROR: &str = "PYTHON_IMPORT_ERROR";
    pub const AUTOFIX_TIMEOUT: &str = "AUTOFIX_TIMEOUT";
    pub const UNCLASSIFIED_DISCOVERY_FAILURE: &str = "UNCLASSIFIED_DISCOVERY_FAILURE";

    // Test execution
    pub const NO_TESTS_FOUND: &str = "NO_TESTS_FOUND";
    pub const TS_IN_UNTRANSPILED_RUNNER: &str = "TS_IN_UNTRANSPILED_RUNNER";
    pub const ESM_MODULE_SYNTAX: &str = "ESM_MODULE_SYNTAX";
    pub const MISSING_TEST_UTILITY: &str = "MISSING_TEST_UTILITY";
    pub const INVALID_MOCK_PATTERN: &str = "INVALID_MOCK_PATTERN";
    pub const BUILD_COMPILE_FAILURE: &str = "BUILD_COMPILE_FAILURE";
    pub const MISSING_TEST_RUNNER: &str = "MISSING_TEST_RUNNER";
    pub const TEST_EXECUTION_FAILED: &str = "TEST_EXECUTION_FAILED";
    pub const TEST_EXECUTION_TIMEOUT: &str = "TEST_EXECUTION_TIMEOUT";
    pub const TEST_COUNTS_UNPARSED: &str = "TEST_COUNTS_UNPARSED";
    pub const BUILD_FAILED: &str = "BUILD_FAILED";

    // Orchestration
    pub const GENERATION_FAILED: &str = "GENERATION_FAILED";
    pub const ENV_HEAL_FAILED: &str = "ENV_HEAL_FAILED";
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";

    /// Codes counted as discovery errors in the job summary
    pub const DISCOVERY: &[&str] = &[NO_TESTS_FOUND, TEST_DISCOVERY_PATTERN_MISMATCH];
}

/// Primary language of a detected project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Java,
    Go,
    CSharp,
}

impl Language {
    pub fn ecosystem(self) -> Ecosystem {
        match self {
            Self::TypeScript | Self::JavaScript => Ecosystem::Node,
            Self::Python => Ecosystem::Python,
            Self::Java => Ecosystem::Java,
            Self::Go => Ecosystem::Go,
            Self::CSharp => Ecosystem::DotNet,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeScript => write!(f, "TypeScript"),
            Self::JavaScript => write!(f, "JavaScript"),
            Self::Python => write!(f, "Python"),
            Self::Java => write!(f, "Java"),
            Self::Go => write!(f, "Go"),
            Self::CSharp => write!(f, "C#"),
        }
    }
}

/// Toolchain family; selects healer, auto-fix profile and adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Node,
    Python,
    Java,
    Go,
    DotNet,
}

/// Test category a suite belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCategory {
    Unit,
    Integration,
    E2e,
}

impl TestCategory {
    pub const ALL: [TestCategory; 3] = [Self::Unit, Self::Integration, Self::E2e];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::E2e => "e2e",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unit" => Some(Self::Unit),
            "integration" => Some(Self::Integration),
            "e2e" | "end-to-end" => Some(Self::E2e),
            _ => None,
        }
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected sub-project; immutable once analysis produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub name: String,
    /// Path relative to the repository root
    pub path: PathBuf,
    pub language: Language,
    pub framework: Option<String>,
    pub build_tool: Option<String>,
    pub test_framework: Option<String>,
}

impl ProjectDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            language,
            framework: None,
            build_tool: None,
            test_framework: None,
        }
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.language.ecosystem()
    }

    pub fn root_in(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.path)
    }

    /// Directory-safe form of the name, used to partition artifacts
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        if slug.is_empty() { "project".to_string() } else { slug }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "analysis")]
    Analysis,
    #[serde(rename = "generation")]
    Generation,
    #[serde(rename = "execution")]
    Execution,
    #[serde(rename = "env-setup")]
    EnvSetup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A suggested fix, shown to the user when it was not or could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationStep {
    pub title: String,
    pub description: String,
    pub command: Option<String>,
    pub file_path: Option<PathBuf>,
}

impl RemediationStep {
    pub fn manual(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { title: title.into(), description: description.into(), command: None, file_path: None }
    }

    pub fn command(
        title: impl Into<String>,
        description: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            command: Some(command.into()),
            file_path: None,
        }
    }

    pub fn file(
        title: impl Into<String>,
        description: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            command: None,
            file_path: Some(path.into()),
        }
    }
}

/// Deduplication key: `(project, code, filePath)`
pub type IssueKey = (String, String, Option<PathBuf>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentIssue {
    pub project: String,
    pub stage: Stage,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub file_path: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub auto_fixed: bool,
    pub remediation: Vec<RemediationStep>,
}

impl EnvironmentIssue {
    pub fn new(
        project: impl Into<String>,
        stage: Stage,
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            stage,
            severity,
            code: code.into(),
            message: message.into(),
            details: None,
            file_path: None,
            line: None,
            column: None,
            auto_fixed: false,
            remediation: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_remediation(mut self, step: RemediationStep) -> Self {
        self.remediation.push(step);
        self
    }

    pub fn key(&self) -> IssueKey {
        (self.project.clone(), self.code.clone(), self.file_path.clone())
    }

    /// Error-severity and still unfixed
    pub fn is_outstanding_error(&self) -> bool {
        self.severity == Severity::Error && !self.auto_fixed
    }
}

/// A remediation that was actually executed. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFixAction {
    pub project: String,
    pub target: PathBuf,
    pub command: String,
    pub description: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
}

impl AutoFixAction {
    pub fn record(
        project: impl Into<String>,
        target: impl Into<PathBuf>,
        command: impl Into<String>,
        description: impl Into<String>,
        success: bool,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            target: target.into(),
            command: command.into(),
            description: description.into(),
            success,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Issues and actions accumulated by one stage for one project.
///
/// Each stage returns one of these and the orchestrator merges them; no
/// component keeps a reference to another project's accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Findings {
    issues: Vec<EnvironmentIssue>,
    actions: Vec<AutoFixAction>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an issue unless its key is already present. Returns whether it was added.
    pub fn report(&mut self, issue: EnvironmentIssue) -> bool {
        if self.contains(&issue.key()) {
            return false;
        }
        self.issues.push(issue);
        true
    }

    pub fn record(&mut self, action: AutoFixAction) {
        self.actions.push(action);
    }

    pub fn contains(&self, key: &IssueKey) -> bool {
        self.issues.iter().any(|i| &i.key() == key)
    }

    pub fn get(&self, key: &IssueKey) -> Option<&EnvironmentIssue> {
        self.issues.iter().find(|i| &i.key() == key)
    }

    /// Flip `autoFixed` after a remediation was confirmed
    pub fn mark_fixed(&mut self, key: &IssueKey) -> bool {
        match self.issues.iter_mut().find(|i| &i.key() == key) {
            Some(issue) => {
                issue.auto_fixed = true;
                true
            }
            None => false,
        }
    }

    /// Merge another accumulator; duplicate keys keep the first issue but
    /// inherit a confirmed fix from the incoming one.
    pub fn merge(&mut self, other: Findings) {
        for issue in other.issues {
            let key = issue.key();
            if issue.auto_fixed {
                self.mark_fixed(&key);
            }
            self.report(issue);
        }
        self.actions.extend(other.actions);
    }

    pub fn issues(&self) -> &[EnvironmentIssue] {
        &self.issues
    }

    pub fn actions(&self) -> &[AutoFixAction] {
        &self.actions
    }

    pub fn unfixed(&self) -> impl Iterator<Item = &EnvironmentIssue> {
        self.issues.iter().filter(|i| !i.auto_fixed)
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.actions.is_empty()
    }

    pub fn into_parts(self) -> (Vec<EnvironmentIssue>, Vec<AutoFixAction>) {
        (self.issues, self.actions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of running one category for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteResult {
    pub category: TestCategory,
    pub command: String,
    pub status: SuiteStatus,
    pub exit_code: Option<i32>,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub duration_ms: u64,
    pub output: String,
    pub errors: Vec<String>,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
}

impl TestSuiteResult {
    pub fn skipped(category: TestCategory, reason: impl Into<String>) -> Self {
        Self {
            category,
            command: String::new(),
            status: SuiteStatus::Skipped,
            exit_code: None,
            tests_run: 0,
            tests_passed: 0,
            tests_failed: 0,
            duration_ms: 0,
            output: reason.into(),
            errors: Vec::new(),
            stdout_log: None,
            stderr_log: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Passed,
    Failed,
    Partial,
}

impl OverallStatus {
    /// `partial` when suites both passed and failed; `failed` when any failed
    /// or nothing passed; `passed` otherwise.
    pub fn from_suites(suites: &[TestSuiteResult]) -> Self {
        let passed = suites.iter().any(|s| s.status == SuiteStatus::Passed);
        let failed = suites.iter().any(|s| s.status == SuiteStatus::Failed);

        match (passed, failed) {
            (true, true) => Self::Partial,
            (true, false) => Self::Passed,
            _ => Self::Failed,
        }
    }
}

/// Coverage command outcome; the report itself is parsed elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageArtifact {
    pub command: String,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
}

/// Everything that happened to one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub project: ProjectDescriptor,
    pub suites: Vec<TestSuiteResult>,
    pub issues: Vec<EnvironmentIssue>,
    pub actions: Vec<AutoFixAction>,
    pub generated_files: Vec<PathBuf>,
    pub coverage: Option<CoverageArtifact>,
    pub overall_status: OverallStatus,
}

impl TestRunResult {
    pub fn new(
        project: ProjectDescriptor,
        suites: Vec<TestSuiteResult>,
        findings: Findings,
        generated_files: Vec<PathBuf>,
        coverage: Option<CoverageArtifact>,
    ) -> Self {
        let overall_status = OverallStatus::from_suites(&suites);
        let (issues, actions) = findings.into_parts();
        Self { project, suites, issues, actions, generated_files, coverage, overall_status }
    }

    pub fn tests_run(&self) -> u32 {
        self.suites.iter().map(|s| s.tests_run).sum()
    }

    pub fn tests_failed(&self) -> u32 {
        self.suites.iter().map(|s| s.tests_failed).sum()
    }
}

/// States of the top-level job state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Init,
    Clone,
    Analyze,
    Generate,
    EnvHeal,
    Execute,
    Refine,
    Finalize,
    Complete,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Clone => "CLONE",
            Self::Analyze => "ANALYZE",
            Self::Generate => "GENERATE",
            Self::EnvHeal => "ENV_HEAL",
            Self::Execute => "EXECUTE",
            Self::Refine => "REFINE",
            Self::Finalize => "FINALIZE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTransition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub total_projects: usize,
    pub total_suites: usize,
    pub total_tests: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub failed_suites: usize,
    pub discovery_errors: usize,
    pub total_issues: usize,
    pub auto_fixed_issues: usize,
    pub auto_fix_actions: usize,
    /// Set whenever zero tests ran
    pub reason: Option<String>,
}

impl JobSummary {
    pub fn compute(
        projects: &[TestRunResult],
        issues: &[EnvironmentIssue],
        actions: &[AutoFixAction],
    ) -> Self {
        let suites = projects.iter().flat_map(|p| p.suites.iter());
        let total_suites = suites.clone().count();
        let failed_suites = suites.clone().filter(|s| s.status == SuiteStatus::Failed).count();
        let total_tests: u32 = projects.iter().map(TestRunResult::tests_run).sum();
        let tests_passed: u32 = suites.map(|s| s.tests_passed).sum();
        let tests_failed: u32 = projects.iter().map(TestRunResult::tests_failed).sum();

        let reason = (total_tests == 0).then(|| Self::zero_test_reason(projects, issues));

        Self {
            total_projects: projects.len(),
            total_suites,
            total_tests,
            tests_passed,
            tests_failed,
            failed_suites,
            discovery_errors: issues
                .iter()
                .filter(|i| codes::DISCOVERY.contains(&i.code.as_str()))
                .count(),
            total_issues: issues.len(),
            auto_fixed_issues: issues.iter().filter(|i| i.auto_fixed).count(),
            auto_fix_actions: actions.len(),
            reason,
        }
    }

    fn zero_test_reason(projects: &[TestRunResult], issues: &[EnvironmentIssue]) -> String {
        if projects.is_empty() {
            return "No projects were processed".to_string();
        }
        let headline = issues
            .iter()
            .find(|i| i.is_outstanding_error())
            .or_else(|| issues.iter().find(|i| !i.auto_fixed))
            .or_else(|| issues.first());

        match headline {
            Some(issue) => format!(
                "No tests were executed; {} issue(s) reported (first: {}: {})",
                issues.len(),
                issue.code,
                issue.message
            ),
            None => "No tests were executed and no test files were discovered".to_string(),
        }
    }
}

/// Terminal artifact of a job; constructed once by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: String,
    pub source: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects: Vec<TestRunResult>,
    pub issues: Vec<EnvironmentIssue>,
    pub actions: Vec<AutoFixAction>,
    pub errors: Vec<String>,
    pub summary: JobSummary,
    pub stages: Vec<StageTransition>,
}

impl JobResult {
    /// `failed` on any failed project, failed test, failed suite, outstanding
    /// error issue, or zero tests in the presence of issues; then `partial`
    /// if any project is partial; else `success`.
    pub fn derive_status(projects: &[TestRunResult], issues: &[EnvironmentIssue]) -> JobStatus {
        let total_tests: u32 = projects.iter().map(TestRunResult::tests_run).sum();

        let failed = projects.iter().any(|p| p.overall_status == OverallStatus::Failed)
            || projects.iter().any(|p| p.tests_failed() > 0)
            || issues.iter().any(EnvironmentIssue::is_outstanding_error)
            || projects
                .iter()
                .flat_map(|p| p.suites.iter())
                .any(|s| s.status == SuiteStatus::Failed)
            || (total_tests == 0 && !issues.is_empty());

        if failed {
            JobStatus::Failed
        } else if projects.iter().any(|p| p.overall_status == OverallStatus::Partial) {
            JobStatus::Partial
        } else {
            JobStatus::Success
        }
    }
}
