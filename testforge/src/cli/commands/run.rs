//! Run command - execute a full job and persist its result

use crate::cli::app::RunArgs;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testforge_core::generator::{LlmTestGenerator, NoopGenerator, TestGenerator};
use testforge_core::model::{JobResult, JobStatus, SuiteStatus};
use testforge_core::runner::ShellRunner;
use testforge_core::{Config, Orchestrator};
use tracing::{info, warn};

pub const RESULT_FILE: &str = "result.json";

/// Run one job; returns its final status
pub async fn execute(args: RunArgs, config_path: Option<&Path>) -> Result<JobStatus> {
    let mut config = Config::resolve(config_path).context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let generator = select_generator(&config)?;
    let config = Arc::new(config);
    let orchestrator = Orchestrator::new(config.clone(), Arc::new(ShellRunner::new()), generator);

    let result = orchestrator.execute(&args.source).await;
    let path = write_result(&config.artifacts_dir, &result)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result, &path);
    }

    Ok(result.status)
}

pub fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if !args.categories.is_empty() {
        config.categories = testforge_core::config::CategoriesConfig::only(&args.categories);
    }
    if args.no_autofix {
        config.auto_fix.enabled = false;
    }
    if let Some(max) = args.max_iterations {
        config.auto_fix.max_iterations = max;
    }
    if args.no_generate {
        config.generation.enabled = false;
    }
    if args.parallel {
        config.parallel = true;
    }
    if let Some(dir) = &args.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }
}

fn select_generator(config: &Config) -> Result<Arc<dyn TestGenerator>> {
    if !config.generation.enabled {
        info!("Test generation disabled; running existing tests only");
        return Ok(Arc::new(NoopGenerator));
    }
    if config.generation.api_key.is_none() {
        warn!(
            "{} is not set; running existing tests only",
            config.generation.api_key_env
        );
        return Ok(Arc::new(NoopGenerator));
    }
    Ok(Arc::new(LlmTestGenerator::new(config.generation.clone())?))
}

/// Write `<artifacts>/<job_id>/result.json`
pub fn write_result(artifacts_dir: &Path, result: &JobResult) -> Result<PathBuf> {
    let dir = artifacts_dir.join(&result.job_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(RESULT_FILE);
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn print_summary(result: &JobResult, path: &Path) {
    let summary = &result.summary;
    let elapsed = result.finished_at - result.started_at;

    println!("\n Job {} ({:?})", result.job_id, result.status);
    println!("  Source: {}", result.source);
    println!("  Duration: {}s", elapsed.num_seconds());
    println!(
        "  Tests: {} run, {} passed, {} failed",
        summary.total_tests, summary.tests_passed, summary.tests_failed
    );

    for project in &result.projects {
        println!("\n  {} [{}] {:?}", project.project.name, project.project.language, project.overall_status);
        for suite in &project.suites {
            let mark = match suite.status {
                SuiteStatus::Passed => "ok",
                SuiteStatus::Failed => "FAILED",
                SuiteStatus::Skipped => "skipped",
            };
            println!(
                "    {:<12} {:<8} {}/{} passed",
                suite.category.as_str(),
                mark,
                suite.tests_passed,
                suite.tests_run
            );
        }
    }

    if summary.total_issues > 0 {
        println!(
            "\n  Issues: {} ({} auto-fixed, {} actions)",
            summary.total_issues, summary.auto_fixed_issues, summary.auto_fix_actions
        );
        for issue in result.issues.iter().filter(|i| !i.auto_fixed) {
            println!("    [{}] {}: {}", issue.project, issue.code, issue.message);
        }
    }

    for error in &result.errors {
        println!("  Error: {error}");
    }
    if let Some(reason) = &summary.reason {
        println!("\n  {reason}");
    }

    println!("\n  Result written to {}", path.display());
}
