//! Core functionality for testforge
//!
//! Takes a repository, detects its projects, writes generated tests through
//! an import and quality gate, repairs each project's test environment and
//! runs its suites, then folds everything into one [`JobResult`].
//!
//! The [`orchestrator::Orchestrator`] is the entry point. Processes, test
//! generation and ecosystem commands sit behind traits
//! ([`runner::CommandRunner`], [`generator::TestGenerator`],
//! [`adapter::EcosystemAdapter`]) so every stage can run without a real
//! toolchain.

pub mod adapter;
pub mod analysis;
pub mod autofix;
pub mod config;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod healer;
pub mod model;
pub mod orchestrator;
pub mod repo;
pub mod runner;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use errors::{Result, TestForgeError};
pub use model::{JobResult, JobStatus, ProjectDescriptor};
pub use orchestrator::Orchestrator;
