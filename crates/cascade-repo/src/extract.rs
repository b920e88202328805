//! Extraction of single repositories and of consistent product states.

use crate::error::RepoError;
use crate::git::GitExecutor;
use crate::repo::GitRepo;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use cascade_core::ports::{CheckoutTarget, RepoStateManager};
use cascade_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// [`RepoStateManager`] over git, resolving repository names to URLs from
/// a fixed table.
pub struct RepoExtractor {
    urls: HashMap<String, String>,
    default_branch: String,
    git: Arc<dyn GitExecutor>,
    retry: RetryPolicy,
}

impl RepoExtractor {
    pub fn new(
        urls: HashMap<String, String>,
        git: Arc<dyn GitExecutor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            urls,
            default_branch: "master".to_string(),
            git,
            retry,
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    fn url(&self, repo_name: &str) -> Result<&str> {
        self.urls
            .get(repo_name)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::MissingReference(format!("no URL configured for repository {repo_name}"))
            })
    }
}

#[async_trait]
impl RepoStateManager for RepoExtractor {
    async fn extract(
        &self,
        repo_name: &str,
        branch: &str,
        target: CheckoutTarget,
        root_dir: &Path,
    ) -> Result<String> {
        let url = self.url(repo_name)?;
        let mut repo = GitRepo::new(
            root_dir,
            repo_name,
            url,
            branch,
            self.git.clone(),
            self.retry.clone(),
        )
        .with_default_branch(&self.default_branch);

        let sha = match target {
            CheckoutTarget::Commit(commit) => {
                repo = repo.with_commit(commit);
                repo.prepare().await?;
                repo.checkout().await?
            }
            CheckoutTarget::Time(time) => {
                repo.prepare().await?;
                repo.revert_commit_by_time(time).await?;
                repo.checkout().await?
            }
            CheckoutTarget::Head => {
                info!(repo = repo_name, "Commit id and time not given, using branch head");
                repo.prepare().await?;
                repo.checkout().await?
            }
        };
        Ok(sha)
    }
}

/// One entry of a product's source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub commit_id: Option<String>,
}

fn default_branch() -> String {
    "master".to_string()
}

/// Resolved state of one repository after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub branch: String,
    pub commit_id: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<bool>,
}

/// A set of repositories extracted together so that they match in time.
///
/// Repositories pinned to a commit are extracted first. The others are
/// checked out at the last commit before `commit_time`, or before the commit
/// time of the pinned repository when no time is given.
pub struct ProductState {
    repos: Vec<GitRepo>,
    commit_time: Option<DateTime<Utc>>,
}

impl ProductState {
    pub fn new(
        sources: BTreeMap<String, RepoSource>,
        root_dir: &Path,
        commit_time: Option<DateTime<Utc>>,
        git: Arc<dyn GitExecutor>,
        retry: RetryPolicy,
    ) -> Self {
        let repos = sources
            .into_iter()
            .map(|(name, source)| {
                let repo = GitRepo::new(
                    root_dir,
                    name,
                    source.url,
                    source.branch,
                    git.clone(),
                    retry.clone(),
                );
                match source.commit_id {
                    Some(commit) => repo.with_commit(commit),
                    None => repo,
                }
            })
            .collect();
        Self { repos, commit_time }
    }

    pub async fn extract_all(&mut self) -> std::result::Result<(), RepoError> {
        let mut pinned_time = None;
        for repo in self.repos.iter_mut().filter(|r| r.commit_id().is_some()) {
            repo.prepare().await?;
            pinned_time = Some(repo.commit_time(None).await?);
            repo.checkout().await?;
        }

        let slice = self.commit_time.or(pinned_time);
        for repo in self.repos.iter_mut().filter(|r| r.commit_id().is_none()) {
            repo.prepare().await?;
            if let Some(time) = slice {
                repo.revert_commit_by_time(time).await?;
            }
            repo.checkout().await?;
        }
        Ok(())
    }

    pub fn states(&self, trigger: Option<&str>) -> BTreeMap<String, RepoState> {
        self.repos
            .iter()
            .map(|repo| {
                let state = RepoState {
                    branch: repo.branch().to_string(),
                    commit_id: repo.commit_id().map(str::to_string),
                    url: repo.url().to_string(),
                    trigger: (trigger == Some(repo.name())).then_some(true),
                };
                (repo.name().to_string(), state)
            })
            .collect()
    }

    /// Write the repository states as JSON, marking `trigger`.
    pub fn save_states(&self, path: &Path, trigger: Option<&str>) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.states(trigger))?;
        std::fs::write(path, content)?;
        Ok(path.to_path_buf())
    }
}
