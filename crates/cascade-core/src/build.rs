//! Build history types.
//!
//! These mirror what the external build store records for every executed
//! build. The scheduler only ever reads them.

use crate::change::SourceMetadata;
use crate::ids::{BuildId, BuildRequestId, BuilderName};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// No build exists yet for the builder under this root.
    NotStarted,
    Running,
    Passed,
    Failed,
    HasWarnings,
    Skipped,
    /// The build was interrupted and will be re-run under the same request.
    Retried,
    Cancelled,
    HasException,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Passed
                | BuildStatus::Failed
                | BuildStatus::HasWarnings
                | BuildStatus::Skipped
                | BuildStatus::Cancelled
                | BuildStatus::HasException
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Passed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::NotStarted => "not_started",
            BuildStatus::Running => "running",
            BuildStatus::Passed => "passed",
            BuildStatus::Failed => "failed",
            BuildStatus::HasWarnings => "has_warnings",
            BuildStatus::Skipped => "skipped",
            BuildStatus::Retried => "retried",
            BuildStatus::Cancelled => "cancelled",
            BuildStatus::HasException => "has_exception",
        };
        f.write_str(s)
    }
}

/// One executed (or synthetic, not yet started) build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildRecord {
    /// `None` only for synthetic `NotStarted` records.
    pub id: Option<BuildId>,
    pub request_id: Option<BuildRequestId>,
    pub builder_name: BuilderName,
    pub parent_build_id: Option<BuildId>,
    pub status: BuildStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Present only while running.
    pub current_step_name: Option<String>,
    /// Present only while running and the current step is the join step.
    pub current_step_started_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    pub fn not_started(builder_name: BuilderName) -> Self {
        Self {
            id: None,
            request_id: None,
            builder_name,
            parent_build_id: None,
            status: BuildStatus::NotStarted,
            started_at: None,
            current_step_name: None,
            current_step_started_at: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id.is_some() && self.parent_build_id.is_none()
    }

    /// Whether this build is running and currently inside `join_step`.
    pub fn is_at_step(&self, join_step: &str) -> bool {
        self.status == BuildStatus::Running && self.current_step_name.as_deref() == Some(join_step)
    }
}

/// A step of a build, as stored by the build store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub build_id: BuildId,
    pub name: String,
    /// May be briefly absent while the store is still writing the step.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A request to create a build, issued by a parent build's trigger step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildRequest {
    pub id: BuildRequestId,
    pub builder_name: BuilderName,
    pub parent_build_id: Option<BuildId>,
    pub source: SourceMetadata,
    pub submitted_at: DateTime<Utc>,
}

/// Payload for asking the store to create a build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBuildRequest {
    pub builder_name: BuilderName,
    pub parent_build_id: Option<BuildId>,
    pub source: SourceMetadata,
}
