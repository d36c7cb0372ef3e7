use clap::{Parser, Subcommand};
use std::path::PathBuf;
use testforge_core::model::TestCategory;

#[derive(Parser, Debug)]
#[command(
    name = "testforge",
    version,
    about = "TestForge - generate, heal and run tests for any repository",
    long_about = "TestForge detects the projects in a repository, writes generated tests through an import and quality gate, repairs each project's test environment and runs the suites, then reports one aggregated result."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full job against a repository
    #[command(about = "Generate, heal and execute tests for a repository")]
    Run(RunArgs),

    /// Detect projects without running anything
    #[command(about = "List the projects detected in a repository")]
    Analyze(AnalyzeArgs),

    /// Check the relative imports of a test file
    #[command(name = "check-imports", about = "Check and correct relative imports in a test file")]
    CheckImports(CheckImportsArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Local path or git URL of the repository
    #[arg(help = "Repository path or git URL")]
    pub source: String,

    /// Restrict the job to these categories
    #[arg(long, value_delimiter = ',', value_parser = parse_category)]
    pub categories: Vec<TestCategory>,

    /// Disable the auto-fix loops and healer repairs
    #[arg(long)]
    pub no_autofix: bool,

    /// Upper bound on auto-fix iterations per category
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Skip test generation and run existing tests only
    #[arg(long)]
    pub no_generate: bool,

    /// Process projects concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Override the artifacts directory
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Print the full job result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Repository directory to analyze
    #[arg(help = "Path to the repository", default_value = ".")]
    pub path: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CheckImportsArgs {
    /// Test file to check
    pub file: PathBuf,

    /// Project root the imports resolve against
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Write corrected content back to the file
    #[arg(long)]
    pub write: bool,
}

fn parse_category(value: &str) -> Result<TestCategory, String> {
    TestCategory::parse(value)
        .ok_or_else(|| format!("unknown category '{value}' (expected unit, integration or e2e)"))
}
