//! Check-imports command - run the import gate over one file

use crate::cli::app::CheckImportsArgs;
use anyhow::{Context, Result};
use testforge_core::validator::{ImportDecision, check_imports};

/// Returns whether the file would be written by the validator
pub async fn execute(args: CheckImportsArgs) -> Result<bool> {
    let file = std::path::absolute(&args.file)?;
    let root = std::path::absolute(&args.root)?;
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!(" Checking imports: {}", file.display());

    match check_imports(&file, &content, &root) {
        ImportDecision::Write { content: patched, corrections, unresolved } => {
            for correction in &corrections {
                println!(
                    "  line {}: '{}' -> '{}'",
                    correction.line, correction.original, correction.corrected
                );
            }
            for import in &unresolved {
                println!("  line {}: '{}' unresolved, commented out", import.line, import.specifier);
            }
            if corrections.is_empty() && unresolved.is_empty() {
                println!("  All relative imports resolve");
            } else if args.write && patched != content {
                tokio::fs::write(&file, patched).await?;
                println!("  Updated {}", file.display());
            }
            Ok(true)
        }
        ImportDecision::Skip { reason, unresolved } => {
            println!("  Would be skipped: {reason}");
            for import in &unresolved {
                println!("  line {}: '{}'", import.line, import.specifier);
            }
            Ok(false)
        }
    }
}
