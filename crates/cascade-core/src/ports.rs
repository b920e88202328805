//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! external build store, build-request submission and repository handling.

use crate::Result;
use crate::build::{BuildRecord, BuildRequest, NewBuildRequest, StepRecord};
use crate::ids::{BuildId, BuildRequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Read-only view of the build history.
///
/// Implementations must give read-after-write consistency per build id: once
/// a step start is recorded it is visible to every later query.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Get a build by id.
    async fn get_build(&self, id: BuildId) -> Result<Option<BuildRecord>>;

    /// Get a named step of a build.
    async fn get_step(&self, build_id: BuildId, name: &str) -> Result<Option<StepRecord>>;

    /// Get every build materialized for a request (retries included).
    async fn get_builds(&self, request_id: BuildRequestId) -> Result<Vec<BuildRecord>>;

    /// Get the build requests issued by a build's trigger step.
    async fn get_build_requests_for_parent(&self, build_id: BuildId) -> Result<Vec<BuildRequest>>;
}

/// Submission of new build requests.
#[async_trait]
pub trait BuildRequester: Send + Sync {
    /// Request a build; the store materializes it asynchronously.
    async fn request_build(&self, request: &NewBuildRequest) -> Result<BuildRequestId>;
}

/// Which revision of a branch to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    Commit(String),
    /// Last commit on the branch at or before the given time.
    Time(DateTime<Utc>),
    Head,
}

/// Clone, fetch and check out repositories for build stages.
#[async_trait]
pub trait RepoStateManager: Send + Sync {
    /// Bring `repo_name` under `root_dir` to the requested state and return
    /// the resolved commit SHA.
    ///
    /// Transient transport errors are retried; a missing branch or commit
    /// fails immediately with [`crate::Error::MissingReference`].
    async fn extract(
        &self,
        repo_name: &str,
        branch: &str,
        target: CheckoutTarget,
        root_dir: &Path,
    ) -> Result<String>;
}
