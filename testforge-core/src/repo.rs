//! Repository acquisition: local paths in place, remote URLs shallow-cloned

use crate::errors::{Result, TestForgeError};
use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Where a job's sources come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    Local(PathBuf),
    Remote(String),
}

impl RepoSource {
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        let remote = source.starts_with("http://")
            || source.starts_with("https://")
            || source.starts_with("git@")
            || source.starts_with("ssh://")
            || source.ends_with(".git");
        if remote { Self::Remote(source.to_string()) } else { Self::Local(PathBuf::from(source)) }
    }

    /// Last path segment without `.git`
    pub fn repo_name(&self) -> String {
        let raw = match self {
            Self::Local(path) => path.file_name().and_then(|n| n.to_str()).unwrap_or("repository"),
            Self::Remote(url) => url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or("repository"),
        };
        let name = raw.trim_end_matches(".git");
        if name.is_empty() { "repository".to_string() } else { name.to_string() }
    }
}

/// Resolve `source` to a directory on disk.
///
/// Remote sources are cloned with `git clone --depth 1` into
/// `<workspace_dir>/<job_id>/<repo-name>`.
pub async fn prepare(
    source: &str,
    workspace_dir: &Path,
    job_id: &str,
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> Result<PathBuf> {
    match RepoSource::parse(source) {
        RepoSource::Local(path) => {
            let path = path.canonicalize().map_err(|e| {
                TestForgeError::repository(format!("{}: {}", path.display(), e))
            })?;
            if !path.is_dir() {
                return Err(TestForgeError::repository(format!("{} is not a directory", path.display())));
            }
            info!("Using local repository {}", path.display());
            Ok(path)
        }
        RepoSource::Remote(url) => {
            let parent = workspace_dir.join(job_id);
            std::fs::create_dir_all(&parent)?;
            let name = RepoSource::Remote(url.clone()).repo_name();

            info!("Cloning {} into {}", url, parent.join(&name).display());
            let command = format!("git clone --depth 1 {url} {name}");
            let output = runner.execute(&command, &parent, timeout).await.map_err(|e| {
                TestForgeError::repository(format!("clone of {url} failed: {e}"))
            })?;

            if !output.success() {
                return Err(TestForgeError::repository(format!(
                    "clone of {url} exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                )));
            }
            Ok(parent.join(name))
        }
    }
}
