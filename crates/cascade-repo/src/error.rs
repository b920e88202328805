//! Git failure classification.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    /// A branch, commit or remote repository that does not exist.
    #[error("{reference} does not exist: {stderr}")]
    MissingReference { reference: String, stderr: String },

    #[error("`git {command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: Box<RepoError>,
    },

    #[error("No commit on {branch} of {repo} at or before {time}")]
    NoCommitBefore {
        repo: String,
        branch: String,
        time: String,
    },

    #[error("Unexpected git output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Only failed git commands are worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::CommandFailed { .. })
    }

    /// Turn a non-zero git exit into an error.
    ///
    /// Exit status 128 or 1 with a missing-reference diagnostic is permanent;
    /// everything else (network, locks, remote hiccups) is retryable.
    pub fn from_exit(args: &[&str], code: Option<i32>, stderr: &str) -> Self {
        let stderr = stderr.trim().to_string();
        if matches!(code, Some(128) | Some(1)) && is_missing_reference(&stderr) {
            let reference = args.last().copied().unwrap_or_default().to_string();
            return RepoError::MissingReference { reference, stderr };
        }
        RepoError::CommandFailed {
            command: args.join(" "),
            code,
            stderr,
        }
    }
}

fn is_missing_reference(stderr: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(does not exist|couldn't find remote ref|did not match any|unknown revision|not a valid object name|bad revision|invalid reference)",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(stderr))
}

impl From<RepoError> for cascade_core::Error {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::MissingReference { .. } | RepoError::NoCommitBefore { .. } => {
                cascade_core::Error::MissingReference(err.to_string())
            }
            RepoError::Spawn(_) | RepoError::Parse(_) => cascade_core::Error::Internal(err.to_string()),
            RepoError::Io(io) => cascade_core::Error::Io(io),
            other => cascade_core::Error::Repository(other.to_string()),
        }
    }
}
