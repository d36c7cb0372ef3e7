use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use testforge_core::JobStatus;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<ExitCode> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run(args) => {
            info!("Run command: {:?}", args);
            let status = runtime.block_on(cli::commands::run::execute(args, cli.config.as_deref()))?;
            if status == JobStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Analyze(args) => {
            info!("Analyze command: {:?}", args);
            runtime.block_on(cli::commands::analyze::execute(&args.path))?;
        }
        Commands::CheckImports(args) => {
            info!("Check-imports command: {:?}", args);
            if !runtime.block_on(cli::commands::check_imports::execute(args))? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
