//! Error types for Cascade CI.

use crate::ids::BuildId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid flow definition: {0}")]
    InvalidFlow(String),

    #[error("Dependency graph error: {0}")]
    Graph(String),

    // Build history errors
    #[error("Build not found: {0}")]
    BuildNotFound(BuildId),

    #[error("Inconsistent build history: {0}")]
    InconsistentHistory(String),

    // Dispatch errors
    #[error("Build request rejected for {builder}: {reason}")]
    RequestRejected { builder: String, reason: String },

    // Repository errors
    #[error("Reference does not exist: {0}")]
    MissingReference(String),

    #[error("Repository operation failed: {0}")]
    Repository(String),

    // Manifest errors
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    // Infrastructure errors
    #[error("Build store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Repository(_) | Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
