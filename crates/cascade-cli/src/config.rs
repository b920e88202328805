//! CLI configuration management.

use anyhow::{Context, Result};
use cascade_repo::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Repository name to clone URL.
    #[serde(default)]
    pub repositories: HashMap<String, String>,
    /// Branch checked out before fetching.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Retry policy for git operations.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_branch() -> String {
    "master".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            repositories: HashMap::new(),
            default_branch: default_branch(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CliConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("ci", "cascade", "cascade-cli")
            .context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }
}
