//! Job configuration
//!
//! Resolved exactly once at startup by [`Config::resolve`]: defaults, then an
//! optional TOML file, then environment overrides. The result is shared as
//! `Arc<Config>` and nothing downstream reads the process environment.

use crate::errors::{Result, TestForgeError};
use crate::model::TestCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Name of the config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "testforge.toml";

/// Main configuration for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of all job artifacts (logs, quarantine, reports)
    pub artifacts_dir: PathBuf,

    /// Where remote repositories are cloned
    pub workspace_dir: PathBuf,

    pub categories: CategoriesConfig,
    pub auto_fix: AutoFixConfig,
    pub timeouts: TimeoutsConfig,
    pub generation: GenerationConfig,

    /// Run the per-ecosystem checker over generated files
    pub quality_gate: bool,

    /// Run the adapter's coverage command after the test suites
    pub coverage: bool,

    /// Process projects concurrently within each stage
    pub parallel: bool,

    /// Allow one refinement pass over projects with failed suites
    pub refine: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from(".testforge/artifacts"),
            workspace_dir: PathBuf::from(".testforge/workspace"),
            categories: CategoriesConfig::default(),
            auto_fix: AutoFixConfig::default(),
            timeouts: TimeoutsConfig::default(),
            generation: GenerationConfig::default(),
            quality_gate: true,
            coverage: false,
            parallel: false,
            refine: true,
        }
    }
}

/// Which test categories are executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    pub unit: bool,
    pub integration: bool,
    pub e2e: bool,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self { unit: true, integration: true, e2e: false }
    }
}

impl CategoriesConfig {
    pub fn is_enabled(&self, category: TestCategory) -> bool {
        match category {
            TestCategory::Unit => self.unit,
            TestCategory::Integration => self.integration,
            TestCategory::E2e => self.e2e,
        }
    }

    /// Enable exactly the given categories
    pub fn only(categories: &[TestCategory]) -> Self {
        Self {
            unit: categories.contains(&TestCategory::Unit),
            integration: categories.contains(&TestCategory::Integration),
            e2e: categories.contains(&TestCategory::E2e),
        }
    }
}

/// What the healers and the auto-fix loops may change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFixConfig {
    pub enabled: bool,
    pub max_iterations: u32,
    pub install_dependencies: bool,
    pub update_config: bool,
    pub create_environment: bool,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 5,
            install_dependencies: true,
            update_config: true,
            create_environment: true,
        }
    }
}

/// Per-operation timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub test_run_secs: u64,
    pub discovery_secs: u64,
    pub install_secs: u64,
    pub build_secs: u64,
    pub quality_gate_secs: u64,
    pub clone_secs: u64,
    pub coverage_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            test_run_secs: 600,
            discovery_secs: 120,
            install_secs: 300,
            build_secs: 600,
            quality_gate_secs: 60,
            clone_secs: 300,
            coverage_secs: 600,
        }
    }
}

impl TimeoutsConfig {
    pub fn test_run(&self) -> Duration {
        Duration::from_secs(self.test_run_secs)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn quality_gate(&self) -> Duration {
        Duration::from_secs(self.quality_gate_secs)
    }

    pub fn repo_clone(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn coverage(&self) -> Duration {
        Duration::from_secs(self.coverage_secs)
    }
}

/// Test generation through an OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Resolved key; never read from a file
    #[serde(skip)]
    pub api_key: Option<String>,

    pub max_source_files: usize,
    pub max_source_bytes: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            max_source_files: 12,
            max_source_bytes: 48_000,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TestForgeError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the configuration: defaults, file, then environment.
    ///
    /// With no explicit path, `testforge.toml` in the working directory is used
    /// when present.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                info!("Loading configuration from {}", DEFAULT_CONFIG_FILE);
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TESTFORGE_ARTIFACTS_DIR") {
            debug!("artifacts_dir overridden from environment");
            self.artifacts_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup("TESTFORGE_MAX_ITERATIONS") {
            self.auto_fix.max_iterations = value.trim().parse().map_err(|_| {
                TestForgeError::config(format!("TESTFORGE_MAX_ITERATIONS is not a number: {value}"))
            })?;
        }

        if let Some(endpoint) = lookup("TESTFORGE_LLM_ENDPOINT") {
            self.generation.endpoint = endpoint;
        }

        if let Some(model) = lookup("TESTFORGE_LLM_MODEL") {
            self.generation.model = model;
        }

        if let Some(key) = lookup(&self.generation.api_key_env).filter(|k| !k.trim().is_empty()) {
            self.generation.api_key = Some(key);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_fix.max_iterations == 0 {
            return Err(TestForgeError::config("auto_fix.max_iterations must be at least 1"));
        }
        if self.timeouts.test_run_secs == 0 || self.timeouts.discovery_secs == 0 {
            return Err(TestForgeError::config("timeouts must be greater than zero"));
        }
        Ok(())
    }

    pub fn enabled_categories(&self) -> Vec<TestCategory> {
        TestCategory::ALL.into_iter().filter(|c| self.categories.is_enabled(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auto_fix.max_iterations, 5);
        assert!(!config.parallel);
        assert!(config.refine);
        assert_eq!(
            config.enabled_categories(),
            vec![TestCategory::Unit, TestCategory::Integration]
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("testforge.toml");
        std::fs::write(
            &path,
            r#"
parallel = true

[auto_fix]
max_iterations = 2
create_environment = false

[categories]
e2e = true
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.parallel);
        assert_eq!(config.auto_fix.max_iterations, 2);
        assert!(!config.auto_fix.create_environment);
        assert!(config.auto_fix.install_dependencies);
        assert!(config.categories.e2e);
        assert!(config.categories.unit);
        assert_eq!(config.timeouts.test_run_secs, 600);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "parallel = \"maybe\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, TestForgeError::Config { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TESTFORGE_ARTIFACTS_DIR", "/tmp/out"),
            ("TESTFORGE_MAX_ITERATIONS", "3"),
            ("TESTFORGE_LLM_MODEL", "local-coder"),
            ("MY_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.generation.api_key_env = "MY_KEY".to_string();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.artifacts_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.auto_fix.max_iterations, 3);
        assert_eq!(config.generation.model, "local-coder");
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_env_rejects_bad_iterations() {
        let mut config = Config::default();
        let result = config.apply_env(|k| {
            (k == "TESTFORGE_MAX_ITERATIONS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_iterations() {
        let mut config = Config::default();
        config.auto_fix.max_iterations = 0;
        assert!(config.validate().is_err());
    }
}
