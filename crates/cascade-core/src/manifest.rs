//! Build manifest model.
//!
//! The manifest is a YAML document describing, per component, which
//! repositories (and which revisions of them) a build was produced from.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,
    pub event: ManifestEvent,
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
}

fn default_version() -> String {
    "0".to_string()
}

/// The component and repository whose change produced this manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEvent {
    pub component: String,
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub version: String,
    pub build_info: BuildInfo,
    #[serde(default)]
    pub repository: BTreeMap<String, Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Name of the repository that triggered this component.
    pub trigger: String,
    pub product_type: String,
    pub build_type: String,
    pub build_event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub commit_time: Option<String>,
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_revision() -> String {
    "HEAD".to_string()
}

fn default_source_type() -> String {
    "git".to_string()
}

impl Manifest {
    pub fn new(event: ManifestEvent) -> Self {
        Self {
            version: default_version(),
            event,
            components: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ManifestNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest =
            serde_yaml::from_str(&content).map_err(|e| Error::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, component) in &self.components {
            for (key, repo) in &component.repository {
                if key != &repo.name {
                    return Err(Error::InvalidManifest(format!(
                        "component {name}: repository key {key} does not match name {}",
                        repo.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get_component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    /// Returns false when the component exists and `replace` is not set.
    pub fn add_component(&mut self, name: &str, component: Component, replace: bool) -> bool {
        if !replace && self.components.contains_key(name) {
            return false;
        }
        self.components.insert(name.to_string(), component);
        true
    }

    pub fn delete_component(&mut self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    pub fn event_component(&self) -> Option<&Component> {
        self.get_component(&self.event.component)
    }

    pub fn event_repository(&self) -> Option<&Repository> {
        self.event_component()?.get_repository(&self.event.repository)
    }
}

impl Component {
    pub fn get_repository(&self, name: &str) -> Option<&Repository> {
        self.repository.get(name)
    }

    pub fn trigger_repository(&self) -> Option<&Repository> {
        self.get_repository(&self.build_info.trigger)
    }

    pub fn add_repository(&mut self, repository: Repository, replace: bool) -> bool {
        if !replace && self.repository.contains_key(&repository.name) {
            return false;
        }
        self.repository.insert(repository.name.clone(), repository);
        true
    }

    pub fn delete_repository(&mut self, name: &str) -> bool {
        self.repository.remove(name).is_some()
    }
}
