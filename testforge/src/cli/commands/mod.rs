//! Command implementations for the CLI

pub mod analyze;
pub mod check_imports;
pub mod run;
