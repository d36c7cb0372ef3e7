//! Error types for the testforge core
//!
//! Per-project failures never escape the orchestrator; these errors surface at
//! call sites that can convert them into issues or job-level error strings.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for core operations
#[derive(Debug, Error)]
pub enum TestForgeError {
    /// External process exceeded its time budget and was killed
    #[error("Command timed out after {duration:?}: {command}")]
    Timeout { command: String, duration: Duration },

    /// External process could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Repository preparation failed: {message}")]
    Repository { message: String },

    #[error("Project analysis failed: {message}")]
    Analysis { message: String },

    #[error("Test generation failed for {project}: {message}")]
    Generation { project: String, message: String },

    #[error("Failed to write artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid job state transition: {0}")]
    StateTransition(String),
}

impl TestForgeError {
    pub fn timeout(command: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout { command: command.into(), duration }
    }

    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn { command: command.into(), source }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository { message: message.into() }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis { message: message.into() }
    }

    pub fn generation(project: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation { project: project.into(), message: message.into() }
    }

    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact { path: path.into(), message: message.into() }
    }

    /// Whether the failure was a killed, timed-out process
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for TestForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

impl From<toml::de::Error> for TestForgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config { message: err.to_string() }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, TestForgeError>;
