//! Artifact validation for generated test files
//!
//! Every candidate passes the import gate before it is written and the
//! quality gate after. Skipped and quarantined files never reach execution,
//! but their paths and reasons stay visible as issues.

pub mod imports;
pub mod quality;

pub use imports::{ImportDecision, MAX_UNRESOLVED_IMPORTS, check_imports};
pub use quality::{QualityVerdict, check_file};

use crate::config::Config;
use crate::errors::{Result, TestForgeError};
use crate::generator::CandidateFile;
use crate::model::{
    EnvironmentIssue, Findings, ProjectDescriptor, RemediationStep, Severity, Stage, codes,
};
use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Files that made it into the project tree, plus what happened on the way
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Written files, relative to the project root
    pub written: Vec<PathBuf>,
    pub findings: Findings,
}

pub struct ArtifactValidator<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    /// `<artifacts>/<job-id>/<project>/quarantine`
    quarantine_dir: PathBuf,
}

impl<'a> ArtifactValidator<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner, quarantine_dir: PathBuf) -> Self {
        Self { config, runner, quarantine_dir }
    }

    pub async fn process(
        &self,
        project: &ProjectDescriptor,
        root: &Path,
        candidates: Vec<CandidateFile>,
    ) -> Result<ValidationOutcome> {
        let mut outcome = ValidationOutcome::default();

        for candidate in candidates {
            let rel = candidate.path.clone();
            let target = root.join(&rel);

            let content = match check_imports(&target, &candidate.content, root) {
                ImportDecision::Skip { reason, unresolved } => {
                    warn!("Skipping generated file {}: {}", rel.display(), reason);
                    let listing: Vec<String> =
                        unresolved.iter().map(|u| format!("line {}: {}", u.line, u.specifier)).collect();
                    outcome.findings.report(
                        EnvironmentIssue::new(
                            &project.name,
                            Stage::Generation,
                            Severity::Warning,
                            codes::GENERATED_TEST_SKIPPED,
                            format!("Generated test not written: {reason}"),
                        )
                        .with_file(&rel)
                        .with_details(listing.join("\n")),
                    );
                    continue;
                }
                ImportDecision::Write { content, corrections, unresolved } => {
                    for correction in &corrections {
                        outcome.findings.report(
                            EnvironmentIssue::new(
                                &project.name,
                                Stage::Generation,
                                Severity::Info,
                                codes::IMPORT_CORRECTED,
                                format!("Import '{}' rewritten to '{}'", correction.original, correction.corrected),
                            )
                            .with_file(&rel)
                            .at_line(correction.line),
                        );
                    }
                    if let Some(first) = unresolved.first() {
                        let listing: Vec<&str> = unresolved.iter().map(|u| u.specifier.as_str()).collect();
                        outcome.findings.report(
                            EnvironmentIssue::new(
                                &project.name,
                                Stage::Generation,
                                Severity::Warning,
                                codes::UNRESOLVED_IMPORTS,
                                format!("{} unresolved import(s) commented out", unresolved.len()),
                            )
                            .with_file(&rel)
                            .at_line(first.line)
                            .with_details(listing.join(", "))
                            .with_remediation(RemediationStep::file(
                                "Fix the import paths",
                                "Point the commented-out imports at existing modules",
                                &rel,
                            )),
                        );
                    }
                    content
                }
            };

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await.map_err(|e| TestForgeError::artifact(parent, e.to_string()))?;
            }
            fs::write(&target, &content).await.map_err(|e| TestForgeError::artifact(&target, e.to_string()))?;

            if !self.config.quality_gate {
                outcome.written.push(rel);
                continue;
            }

            match check_file(self.runner, root, &rel, self.config.timeouts.quality_gate()).await {
                QualityVerdict::Clean | QualityVerdict::Unchecked => outcome.written.push(rel),
                QualityVerdict::Failed { output, irrecoverable: false } => {
                    outcome.findings.report(
                        EnvironmentIssue::new(
                            &project.name,
                            Stage::Generation,
                            Severity::Warning,
                            codes::TEST_QUALITY_GATE_FAILED,
                            "Generated test failed the quality gate",
                        )
                        .with_file(&rel)
                        .with_details(truncate(&output, 2000)),
                    );
                    outcome.written.push(rel);
                }
                QualityVerdict::Failed { output, irrecoverable: true } => {
                    let destination = self.quarantine(&target, &rel).await?;
                    info!("Quarantined {} to {}", rel.display(), destination.display());
                    outcome.findings.report(
                        EnvironmentIssue::new(
                            &project.name,
                            Stage::Generation,
                            Severity::Warning,
                            codes::TEST_QUARANTINED,
                            format!("Generated test has syntax errors; moved to {}", destination.display()),
                        )
                        .with_file(&rel)
                        .with_details(truncate(&output, 2000))
                        .with_remediation(RemediationStep::file(
                            "Review the quarantined test",
                            "Fix the syntax errors and move the file back into the test tree",
                            destination,
                        )),
                    );
                }
            }
        }

        Ok(outcome)
    }

    async fn quarantine(&self, source: &Path, rel: &Path) -> Result<PathBuf> {
        let destination = self.quarantine_dir.join(rel);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|e| TestForgeError::artifact(parent, e.to_string()))?;
        }
        // Rename fails across devices; fall back to copy and delete
        if fs::rename(source, &destination).await.is_err() {
            fs::copy(source, &destination)
                .await
                .map_err(|e| TestForgeError::artifact(&destination, e.to_string()))?;
            fs::remove_file(source).await.map_err(|e| TestForgeError::artifact(source, e.to_string()))?;
        }
        Ok(destination)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
