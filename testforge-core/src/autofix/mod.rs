//! Auto-fix loop
//!
//! Runs a discovery command, classifies a failure against an ordered table of
//! signatures, remediates through the project's healer and runs again. The
//! loop only cares whether tests are discovered and run; failing assertions
//! are the executor's business.
//!
//! ```text
//! ATTEMPT_RUN -> SUCCESS
//!             -> ANALYZE_FAILURE -> REMEDIATE -> ATTEMPT_RUN
//!                                -> HARD_BLOCKER
//! (budget spent)                 -> EXHAUSTED
//! ```

pub mod jest;
pub mod pytest;

use crate::config::Config;
use crate::errors::Result;
use crate::generator::{RegenerationRequest, TestGenerator};
use crate::healer::{EnvironmentHealer, RemedyAction};
use crate::model::{EnvironmentIssue, ProjectDescriptor, RemediationStep, Severity, Stage, codes};
use crate::runner::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lines of captured output kept in issue details
const EXCERPT_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    AttemptRun,
    AnalyzeFailure,
    Remediate,
    Success,
    HardBlocker,
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::HardBlocker | Self::Exhausted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AttemptRun => "ATTEMPT_RUN",
            Self::AnalyzeFailure => "ANALYZE_FAILURE",
            Self::Remediate => "REMEDIATE",
            Self::Success => "SUCCESS",
            Self::HardBlocker => "HARD_BLOCKER",
            Self::Exhausted => "EXHAUSTED",
        };
        f.write_str(name)
    }
}

/// Repair a signature is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixKind {
    /// Install the test runner itself
    InstallRunner,
    /// Point a broken relative import at the module that exists
    RewriteImport,
    /// Install one missing package
    InstallPackage,
    /// Add a TypeScript transform to Jest
    TypeScriptTransform,
    /// Add a Babel ESM transform to Jest
    EsmTransform,
    /// Let the healer repair discovery configuration
    DiscoveryConfig,
    /// Regenerate a test against a failing model definition
    RegenerateModel,
    /// Missing Python module: local path fix or package install
    PythonModule,
    /// Regenerate the offending test file
    RegenerateFile,
}

/// One row of a classification table: pattern, issue code and handler
pub struct FailureSignature {
    pub code: &'static str,
    pub pattern: Regex,
    pub message: &'static str,
    pub fix: Option<FixKind>,
}

impl FailureSignature {
    pub fn new(code: &'static str, pattern: &str, message: &'static str, fix: Option<FixKind>) -> Self {
        Self { code, pattern: Regex::new(pattern).expect("Invalid regex pattern"), message, fix }
    }
}

/// A signature that matched, with its participating capture groups
#[derive(Debug, Clone)]
pub struct Classified {
    pub code: &'static str,
    pub message: &'static str,
    pub fix: Option<FixKind>,
    pub captures: Vec<String>,
    pub excerpt: String,
}

impl Classified {
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).map(String::as_str)
    }

    fn fingerprint(&self) -> String {
        format!("{}|{}", self.code, self.captures.join("|"))
    }
}

/// First signature in `table` matching `output`
pub fn classify(table: &[FailureSignature], output: &str) -> Option<Classified> {
    table.iter().find_map(|sig| {
        let caps = sig.pattern.captures(output)?;
        Some(Classified {
            code: sig.code,
            message: sig.message,
            fix: sig.fix,
            captures: caps.iter().skip(1).flatten().map(|m| m.as_str().to_string()).collect(),
            excerpt: excerpt(output, caps.get(0).map_or(0, |m| m.start())),
        })
    })
}

/// Up to [`EXCERPT_LINES`] lines starting at the line containing `offset`
fn excerpt(output: &str, offset: usize) -> String {
    let start = output[..offset.min(output.len())].rfind('\n').map_or(0, |p| p + 1);
    output[start..].lines().take(EXCERPT_LINES).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixResult {
    /// The remediation ran and succeeded
    Applied,
    /// Nothing could be done; terminal for the loop
    CannotFix(String),
}

/// What a fix handler may touch
pub struct FixContext<'a> {
    pub project: &'a ProjectDescriptor,
    pub root: &'a Path,
    /// Category test directory, relative to `root`
    pub test_dir: &'a Path,
    /// Test files under `test_dir`, relative to `root`
    pub test_files: &'a [PathBuf],
    pub healer: &'a mut dyn EnvironmentHealer,
    pub generator: &'a dyn TestGenerator,
    pub config: &'a Config,
}

impl FixContext<'_> {
    pub fn issue(&self, failure: &Classified) -> EnvironmentIssue {
        EnvironmentIssue::new(&self.project.name, Stage::Execution, Severity::Error, failure.code, failure.message)
            .with_details(failure.excerpt.clone())
    }

    /// Run `actions` for `issue` now and turn the outcome into a [`FixResult`]
    pub async fn remediate(
        &mut self,
        issue: EnvironmentIssue,
        permission: Option<crate::healer::Permission>,
        actions: Vec<RemedyAction>,
    ) -> FixResult {
        let code = issue.code.clone();
        if self.healer.core_mut().remediate_now(self.root, issue, permission, actions).await {
            FixResult::Applied
        } else {
            FixResult::CannotFix(format!("remediation for {code} failed or is not permitted"))
        }
    }

    /// Re-run the healer's diagnosis and repairs with the current test files
    pub async fn recheck_environment(&mut self) -> Result<()> {
        self.healer.analyze(self.project, self.root, self.test_files)?;
        self.healer.heal(self.root).await
    }

    /// Map a path printed by a tool to one of the test files
    pub fn test_file(&self, printed: &str) -> Option<PathBuf> {
        let printed = Path::new(printed);
        let rel = printed.strip_prefix(self.root).unwrap_or(printed);
        self.test_files
            .iter()
            .find(|f| f.as_path() == rel || (rel.is_absolute() && rel.ends_with(f)) || f.ends_with(rel))
            .cloned()
    }

    /// Replace one test file with a regenerated version
    pub async fn regenerate(&mut self, failure: &Classified, file: &Path, context: Option<&str>) -> Result<FixResult> {
        let current = tokio::fs::read_to_string(self.root.join(file)).await.unwrap_or_default();
        let request = RegenerationRequest {
            project: self.project,
            root: self.root,
            file,
            current_content: &current,
            error: &failure.excerpt,
            context,
        };
        let content = match self.generator.regenerate(&request).await {
            Ok(content) => content,
            Err(e) => return Ok(FixResult::CannotFix(format!("regeneration failed: {e}"))),
        };
        info!("Regenerated {} for {}", file.display(), failure.code);
        let issue = self.issue(failure).with_file(file).with_remediation(RemediationStep::file(
            "Review regenerated test",
            "The test was regenerated from the failure output",
            file,
        ));
        Ok(self.remediate(issue, None, vec![RemedyAction::write(file, content)]).await)
    }
}

/// Ecosystem-specific half of the loop
#[async_trait]
pub trait FixProfile: Send + Sync {
    fn name(&self) -> &'static str;

    fn discovery_command(&self, project: &ProjectDescriptor, root: &Path, test_dir: &Path) -> String;

    /// Tests were found and executed, whatever their outcome
    fn tests_discovered(&self, output: &CommandOutput) -> bool;

    fn signatures(&self) -> &'static [FailureSignature];

    async fn apply_fix(&self, ctx: &mut FixContext<'_>, failure: &Classified) -> Result<FixResult>;
}

/// Profile for the project's test runner, if it has one
pub fn profile_for(project: &ProjectDescriptor) -> Option<Box<dyn FixProfile>> {
    use crate::model::Ecosystem;
    match project.ecosystem() {
        Ecosystem::Node if matches!(project.test_framework.as_deref(), None | Some("jest")) => {
            Some(Box::new(jest::JestProfile))
        }
        Ecosystem::Python => Some(Box::new(pytest::PytestProfile)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub terminal: LoopState,
    pub iterations: u32,
    /// Every state entered, in order
    pub history: Vec<LoopState>,
}

/// One project/category run of the loop. Issues and actions land in the healer.
pub struct AutoFixLoop<'a> {
    profile: &'a dyn FixProfile,
    runner: &'a dyn CommandRunner,
    max_iterations: u32,
}

impl<'a> AutoFixLoop<'a> {
    pub fn new(profile: &'a dyn FixProfile, runner: &'a dyn CommandRunner, max_iterations: u32) -> Self {
        Self { profile, runner, max_iterations }
    }

    /// Run to a terminal state. Failures of the loop's own steps end it as
    /// `HARD_BLOCKER` with an issue on the healer.
    pub async fn run(&self, ctx: &mut FixContext<'_>) -> LoopOutcome {
        let mut history = Vec::new();
        let mut seen = HashSet::new();
        let command = self.profile.discovery_command(ctx.project, ctx.root, ctx.test_dir);
        let timeout = ctx.config.timeouts.discovery();

        for iteration in 1..=self.max_iterations {
            self.enter(&mut history, LoopState::AttemptRun, iteration, ctx.project);
            let output = match self.runner.execute(&command, ctx.root, timeout).await {
                Ok(output) => output,
                Err(e) => {
                    let code = if e.is_timeout() { codes::AUTOFIX_TIMEOUT } else { codes::UNCLASSIFIED_DISCOVERY_FAILURE };
                    warn!("{} discovery run failed: {}", ctx.project.name, e);
                    ctx.healer.core_mut().report(
                        EnvironmentIssue::new(&ctx.project.name, Stage::Execution, Severity::Error, code, e.to_string())
                            .with_file(ctx.test_dir)
                            .with_remediation(RemediationStep::command(
                                "Run discovery manually",
                                "Check why the test runner does not finish",
                                &command,
                            )),
                    );
                    return self.finish(history, LoopState::HardBlocker, iteration, ctx);
                }
            };

            if self.profile.tests_discovered(&output) {
                return self.finish(history, LoopState::Success, iteration, ctx);
            }

            self.enter(&mut history, LoopState::AnalyzeFailure, iteration, ctx.project);
            let combined = output.combined();
            let Some(failure) = classify(self.profile.signatures(), &combined) else {
                ctx.healer.core_mut().report(
                    EnvironmentIssue::new(
                        &ctx.project.name,
                        Stage::Execution,
                        Severity::Error,
                        codes::UNCLASSIFIED_DISCOVERY_FAILURE,
                        format!("Test discovery failed with exit code {} and no known cause", output.exit_code),
                    )
                    .with_file(ctx.test_dir)
                    .with_details(excerpt(&combined, 0)),
                );
                return self.finish(history, LoopState::HardBlocker, iteration, ctx);
            };

            if !seen.insert(failure.fingerprint()) {
                warn!("{} persists after remediation for {}", failure.code, ctx.project.name);
                return self.finish(history, LoopState::HardBlocker, iteration, ctx);
            }

            self.enter(&mut history, LoopState::Remediate, iteration, ctx.project);
            if failure.fix.is_none() {
                let issue = ctx.issue(&failure);
                ctx.healer.core_mut().report(issue);
                return self.finish(history, LoopState::HardBlocker, iteration, ctx);
            }

            match self.profile.apply_fix(ctx, &failure).await {
                Ok(FixResult::Applied) => info!("Applied fix for {} in {}", failure.code, ctx.project.name),
                Ok(FixResult::CannotFix(reason)) => {
                    warn!("Cannot fix {} in {}: {}", failure.code, ctx.project.name, reason);
                    return self.finish(history, LoopState::HardBlocker, iteration, ctx);
                }
                Err(e) => {
                    warn!("Fix for {} in {} failed: {}", failure.code, ctx.project.name, e);
                    let issue = ctx.issue(&failure).with_file(ctx.test_dir);
                    ctx.healer.core_mut().report(issue);
                    return self.finish(history, LoopState::HardBlocker, iteration, ctx);
                }
            }

            if let Err(e) = ctx.recheck_environment().await {
                warn!("Environment re-check for {} failed: {}", ctx.project.name, e);
                ctx.healer.core_mut().report(
                    EnvironmentIssue::new(
                        &ctx.project.name,
                        Stage::EnvSetup,
                        Severity::Error,
                        codes::ENV_HEAL_FAILED,
                        format!("environment re-check after {} failed: {e}", failure.code),
                    )
                    .with_file(ctx.test_dir),
                );
                return self.finish(history, LoopState::HardBlocker, iteration, ctx);
            }
        }

        self.finish(history, LoopState::Exhausted, self.max_iterations, ctx)
    }

    fn enter(&self, history: &mut Vec<LoopState>, state: LoopState, iteration: u32, project: &ProjectDescriptor) {
        debug!("[{}] {} iteration {}: {}", self.profile.name(), project.name, iteration, state);
        history.push(state);
    }

    fn finish(&self, mut history: Vec<LoopState>, terminal: LoopState, iterations: u32, ctx: &FixContext<'_>) -> LoopOutcome {
        info!("[{}] {} finished: {} after {} iteration(s)", self.profile.name(), ctx.project.name, terminal, iterations);
        history.push(terminal);
        LoopOutcome { terminal, iterations, history }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signature_wins() {
        let table = vec![
            FailureSignature::new("FIRST", r"Cannot find module '(\./[^']+)'", "first", None),
            FailureSignature::new("SECOND", r"Cannot find module", "second", None),
        ];
        let hit = classify(&table, "FAIL a.test.js\nCannot find module './x' from 'a.test.js'").unwrap();
        assert_eq!(hit.code, "FIRST");
        assert_eq!(hit.capture(0), Some("./x"));
        assert!(hit.excerpt.starts_with("Cannot find module"));

        assert!(classify(&table, "all good").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(LoopState::Exhausted.is_terminal());
        assert!(!LoopState::Remediate.is_terminal());
        assert_eq!(LoopState::HardBlocker.to_string(), "HARD_BLOCKER");
    }
}
