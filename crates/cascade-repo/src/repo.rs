//! One local checkout of a remote repository.

use crate::error::RepoError;
use crate::git::GitExecutor;
use crate::retry::RetryPolicy;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct GitRepo {
    name: String,
    url: String,
    branch: String,
    default_branch: String,
    root_dir: PathBuf,
    local_dir: PathBuf,
    commit_id: Option<String>,
    git: Arc<dyn GitExecutor>,
    retry: RetryPolicy,
}

impl GitRepo {
    pub fn new(
        root_dir: &Path,
        name: impl Into<String>,
        url: impl Into<String>,
        branch: impl Into<String>,
        git: Arc<dyn GitExecutor>,
        retry: RetryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            local_dir: root_dir.join(&name),
            root_dir: root_dir.to_path_buf(),
            name,
            url: url.into(),
            branch: branch.into(),
            default_branch: "master".to_string(),
            commit_id: None,
            git,
            retry,
        }
    }

    /// Pin the checkout to a commit.
    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    /// Branch checked out before fetching (`master` unless told otherwise).
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Pinned commit, or the resolved SHA after a checkout.
    pub fn commit_id(&self) -> Option<&str> {
        self.commit_id.as_deref()
    }

    async fn git(&self, operation: &str, args: &[&str]) -> Result<String, RepoError> {
        let git = self.git.as_ref();
        let dir = self.local_dir.as_path();
        self.retry
            .retry(operation, move || git.run_checked(dir, args))
            .await
    }

    /// Clone if needed and bring the checkout to the remote state of the
    /// branch.
    pub async fn prepare(&self) -> Result<(), RepoError> {
        info!(repo = %self.name, branch = %self.branch, "Getting repo");
        self.clone_repo().await?;
        self.hard_reset(None).await?;
        self.clean().await?;
        self.checkout_ref(&self.default_branch).await?;
        self.fetch().await?;
        self.hard_reset(Some("FETCH_HEAD")).await
    }

    /// Clone into the root directory, replacing a directory that is not a
    /// usable repository.
    pub async fn clone_repo(&self) -> Result<(), RepoError> {
        if tokio::fs::try_exists(&self.local_dir).await? && !self.is_repository().await? {
            info!(repo = %self.name, dir = %self.local_dir.display(), "Removing broken repo");
            tokio::fs::remove_dir_all(&self.local_dir).await?;
        }
        if tokio::fs::try_exists(&self.local_dir).await? {
            return Ok(());
        }

        info!(repo = %self.name, url = %self.url, "Cloning repo");
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let target = self.local_dir.to_string_lossy().into_owned();
        let args = ["clone", self.url.as_str(), target.as_str()];
        let git = self.git.as_ref();
        let root = self.root_dir.as_path();
        let args = &args[..];
        self.retry
            .retry("clone", move || git.run_checked(root, args))
            .await?;
        Ok(())
    }

    async fn is_repository(&self) -> Result<bool, RepoError> {
        if !tokio::fs::try_exists(self.local_dir.join(".git")).await? {
            return Ok(false);
        }
        let output = self
            .git
            .run(&self.local_dir, &["rev-parse", "--git-dir"])
            .await?;
        Ok(output.is_success())
    }

    pub async fn fetch(&self) -> Result<(), RepoError> {
        info!(repo = %self.name, branch = %self.branch, "Fetching repo");
        self.git("fetch", &["fetch", "origin", &self.branch]).await?;
        Ok(())
    }

    /// Hard reset to `to`, or to `HEAD` when `None`.
    pub async fn hard_reset(&self, to: Option<&str>) -> Result<(), RepoError> {
        info!(repo = %self.name, to = to.unwrap_or("HEAD"), "Hard reset repo");
        match to {
            Some(rev) => self.git("reset", &["reset", "--hard", rev]).await?,
            None => self.git("reset", &["reset", "--hard"]).await?,
        };
        Ok(())
    }

    pub async fn clean(&self) -> Result<(), RepoError> {
        info!(repo = %self.name, "Cleaning repo");
        self.git("clean", &["clean", "-xdf"]).await?;
        Ok(())
    }

    async fn checkout_ref(&self, rev: &str) -> Result<(), RepoError> {
        info!(repo = %self.name, rev, "Checkout repo");
        self.git("checkout", &["checkout", "--force", rev]).await?;
        Ok(())
    }

    /// Check out the pinned commit, or `HEAD` when nothing is pinned, and
    /// remember the resolved SHA.
    pub async fn checkout(&mut self) -> Result<String, RepoError> {
        let rev = self.commit_id.clone().unwrap_or_else(|| "HEAD".to_string());
        self.checkout_ref(&rev).await?;

        let sha = self.git("rev-parse", &["rev-parse", "HEAD"]).await?;
        let sha = sha.trim().to_string();
        let committed = self.commit_time(Some(&sha)).await?;
        info!(repo = %self.name, commit = %sha, committed = %committed, "Checked out");

        self.commit_id = Some(sha.clone());
        Ok(sha)
    }

    /// Pin the last commit of the fetched branch made at or before `time`.
    pub async fn revert_commit_by_time(&mut self, time: DateTime<Utc>) -> Result<String, RepoError> {
        let before = format!("--before={}", time.timestamp());
        let out = self
            .git("rev-list", &["rev-list", "-n", "1", &before, "HEAD"])
            .await?;
        let sha = out.trim();
        if sha.is_empty() {
            return Err(RepoError::NoCommitBefore {
                repo: self.name.clone(),
                branch: self.branch.clone(),
                time: time.to_rfc3339(),
            });
        }
        info!(repo = %self.name, commit = %sha, before = %time, "Pinned commit by time");
        self.commit_id = Some(sha.to_string());
        Ok(sha.to_string())
    }

    /// Commit time of `rev`, or of the pinned commit when `None`.
    pub async fn commit_time(&self, rev: Option<&str>) -> Result<DateTime<Utc>, RepoError> {
        let rev = rev.or(self.commit_id.as_deref()).unwrap_or("HEAD");
        let out = self
            .git("show", &["show", "-s", "--format=%ct", rev])
            .await?;
        let seconds: i64 = out
            .trim()
            .parse()
            .map_err(|_| RepoError::Parse(format!("commit time of {rev}: {}", out.trim())))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| RepoError::Parse(format!("commit time of {rev}: {seconds}")))
    }
}
