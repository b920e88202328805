//! Git command execution.

use crate::error::RepoError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs git. Swapped out in tests for a scripted fake.
#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// Run `git <args>` inside `dir`. A non-zero exit is not an error here.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, RepoError>;

    /// Run `git <args>` and turn a non-zero exit into a classified error.
    async fn run_checked(&self, dir: &Path, args: &[&str]) -> Result<String, RepoError> {
        let output = self.run(dir, args).await?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(RepoError::from_exit(args, output.code, &output.stderr))
        }
    }
}

/// The `git` binary found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SystemGit;

#[async_trait]
impl GitExecutor for SystemGit {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, RepoError> {
        debug!(dir = %dir.display(), args = ?args, "Running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RepoError::Spawn(e.to_string()))?;

        let result = GitOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(exit_code = ?result.code, "git completed");
        Ok(result)
    }
}
