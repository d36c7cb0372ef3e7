//! External command execution
//!
//! Every build, install and test invocation goes through a [`CommandRunner`]:
//! one shell command string, one working directory, one timeout. Retries are
//! the caller's business.

use crate::errors::{Result, TestForgeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self { exit_code, stdout: stdout.into(), stderr: stderr.into(), duration_ms: 0 }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs one shell command per call
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_dir`; fails with [`TestForgeError::Timeout`]
    /// after killing the process if it outlives `timeout`.
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Runs commands through the platform shell with color output disabled
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!("Running `{}` in {:?} (timeout {:?})", command, working_dir, timeout);
        let start = Instant::now();

        let child = Self::shell_command(command)
            .current_dir(working_dir)
            .env("NO_COLOR", "1")
            .env("FORCE_COLOR", "0")
            .env("CI", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TestForgeError::spawn(command, e))?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| TestForgeError::spawn(command, e))?,
            Err(_) => {
                warn!("Command timed out after {:?}: {}", timeout, command);
                return Err(TestForgeError::timeout(command, timeout));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!("`{}` exited with {} in {}ms", command, exit_code, duration_ms);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}

/// Paths of a persisted stdout/stderr pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedLogs {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Writes command output under `<artifacts>/<job-id>/<project>/<category>/`
#[derive(Debug, Clone)]
pub struct LogSink {
    root: PathBuf,
}

impl LogSink {
    pub fn new(artifacts_dir: &Path, job_id: &str) -> Self {
        Self { root: artifacts_dir.join(job_id) }
    }

    /// Job-level artifact directory
    pub fn job_dir(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    pub async fn save_output(
        &self,
        project: &str,
        category: &str,
        output: &CommandOutput,
    ) -> Result<SavedLogs> {
        let dir = self.project_dir(project).join(category);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TestForgeError::artifact(&dir, e.to_string()))?;

        let logs = SavedLogs { stdout: dir.join("stdout.log"), stderr: dir.join("stderr.log") };
        fs::write(&logs.stdout, &output.stdout)
            .await
            .map_err(|e| TestForgeError::artifact(&logs.stdout, e.to_string()))?;
        fs::write(&logs.stderr, &output.stderr)
            .await
            .map_err(|e| TestForgeError::artifact(&logs.stderr, e.to_string()))?;

        Ok(logs)
    }
}
