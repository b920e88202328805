//! Flow definition types.
//!
//! These types represent the user-authored YAML file declaring every builder
//! and the inbound triggers it accepts.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowDefinition {
    /// Builder started directly by change events.
    #[serde(default = "default_root")]
    pub root: String,
    /// Step at which a build asks whether it should trigger downstream work.
    #[serde(default = "default_join_step")]
    pub join_step: String,
    /// Whether a skipped upstream build blocks its downstream joins.
    #[serde(default = "default_true")]
    pub skipped_blocks: bool,
    #[serde(default)]
    pub builders: Vec<BuilderDefinition>,
}

fn default_root() -> String {
    "trigger".to_string()
}

fn default_join_step() -> String {
    "trigger".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuilderDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
}

/// One inbound edge: all `builders` must pass and the change must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TriggerDefinition {
    /// Upstream builders; empty means "started by the root".
    #[serde(default)]
    pub builders: Vec<String>,
    /// Repository names the trigger reacts to; empty means any.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Branch patterns; empty means any.
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branches_ignore: Vec<String>,
}

impl FlowDefinition {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::InvalidFlow(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn builder(&self, name: &str) -> Option<&BuilderDefinition> {
        self.builders.iter().find(|b| b.name == name)
    }
}
