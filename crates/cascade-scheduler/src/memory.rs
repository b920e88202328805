//! In-memory build history.
//!
//! Plays the role of the external build store for tests, simulations and
//! local dry runs. Build timestamps are whatever the caller supplies, so
//! races between siblings can be staged exactly.

use async_trait::async_trait;
use cascade_core::build::{BuildRecord, BuildRequest, BuildStatus, NewBuildRequest, StepRecord};
use cascade_core::ids::{BuildId, BuildRequestId, BuilderName};
use cascade_core::ports::{BuildRequester, BuildStore};
use cascade_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_build: u64,
    next_request: u64,
    builds: BTreeMap<BuildId, BuildRecord>,
    steps: HashMap<(BuildId, String), StepRecord>,
    requests: BTreeMap<BuildRequestId, BuildRequest>,
}

/// Build store and requester backed by maps behind a lock.
#[derive(Default)]
pub struct InMemoryBuildStore {
    inner: RwLock<Inner>,
}

impl InMemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a new build for a request, as a worker picking it up would.
    pub async fn start_build(&self, request_id: BuildRequestId) -> Result<BuildId> {
        self.start_build_at(request_id, Utc::now()).await
    }

    pub async fn start_build_at(
        &self,
        request_id: BuildRequestId,
        started_at: DateTime<Utc>,
    ) -> Result<BuildId> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| Error::Store(format!("unknown build request {request_id}")))?;

        inner.next_build += 1;
        let id = BuildId::new(inner.next_build);
        inner.builds.insert(
            id,
            BuildRecord {
                id: Some(id),
                request_id: Some(request_id),
                builder_name: request.builder_name,
                parent_build_id: request.parent_build_id,
                status: BuildStatus::Running,
                started_at: Some(started_at),
                current_step_name: None,
                current_step_started_at: None,
            },
        );
        Ok(id)
    }

    /// Move a running build into `step`. A `None` start time stages a step
    /// whose record is still being written.
    pub async fn enter_step(
        &self,
        build_id: BuildId,
        step: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let build = inner
            .builds
            .get_mut(&build_id)
            .ok_or(Error::BuildNotFound(build_id))?;
        if build.status != BuildStatus::Running {
            return Err(Error::Store(format!(
                "build {build_id} is {} and cannot enter step {step}",
                build.status
            )));
        }
        build.current_step_name = Some(step.to_string());
        build.current_step_started_at = started_at;

        inner.steps.insert(
            (build_id, step.to_string()),
            StepRecord {
                build_id,
                name: step.to_string(),
                started_at,
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Complete the write of a step start staged with `enter_step(.., None)`.
    pub async fn record_step_start(
        &self,
        build_id: BuildId,
        step: &str,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .steps
            .get_mut(&(build_id, step.to_string()))
            .ok_or_else(|| Error::Store(format!("build {build_id} has no step {step}")))?;
        record.started_at = Some(started_at);

        if let Some(build) = inner.builds.get_mut(&build_id)
            && build.current_step_name.as_deref() == Some(step)
        {
            build.current_step_started_at = Some(started_at);
        }
        Ok(())
    }

    pub async fn finish_build(&self, build_id: BuildId, status: BuildStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let build = inner
            .builds
            .get_mut(&build_id)
            .ok_or(Error::BuildNotFound(build_id))?;
        build.status = status;
        build.current_step_name = None;
        build.current_step_started_at = None;

        for ((id, _), step) in inner.steps.iter_mut() {
            if *id == build_id && step.completed_at.is_none() {
                step.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    pub async fn build(&self, build_id: BuildId) -> Option<BuildRecord> {
        self.inner.read().await.builds.get(&build_id).cloned()
    }

    /// Every request ever made for `builder`, oldest first.
    pub async fn requests_for(&self, builder: &str) -> Vec<BuildRequest> {
        self.inner
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.builder_name == *builder)
            .cloned()
            .collect()
    }

    pub async fn requests(&self) -> Vec<BuildRequest> {
        self.inner.read().await.requests.values().cloned().collect()
    }

    /// Request a build of `builder` directly, bypassing the scheduler.
    pub async fn request(
        &self,
        builder: &str,
        parent: Option<BuildId>,
        source: cascade_core::change::SourceMetadata,
    ) -> Result<BuildRequestId> {
        self.request_build(&NewBuildRequest {
            builder_name: BuilderName::new(builder),
            parent_build_id: parent,
            source,
        })
        .await
    }
}

#[async_trait]
impl BuildStore for InMemoryBuildStore {
    async fn get_build(&self, id: BuildId) -> Result<Option<BuildRecord>> {
        Ok(self.inner.read().await.builds.get(&id).cloned())
    }

    async fn get_step(&self, build_id: BuildId, name: &str) -> Result<Option<StepRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .steps
            .get(&(build_id, name.to_string()))
            .cloned())
    }

    async fn get_builds(&self, request_id: BuildRequestId) -> Result<Vec<BuildRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .builds
            .values()
            .filter(|b| b.request_id == Some(request_id))
            .cloned()
            .collect())
    }

    async fn get_build_requests_for_parent(&self, build_id: BuildId) -> Result<Vec<BuildRequest>> {
        Ok(self
            .inner
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.parent_build_id == Some(build_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BuildRequester for InMemoryBuildStore {
    async fn request_build(&self, request: &NewBuildRequest) -> Result<BuildRequestId> {
        let mut inner = self.inner.write().await;
        if let Some(parent) = request.parent_build_id
            && !inner.builds.contains_key(&parent)
        {
            return Err(Error::RequestRejected {
                builder: request.builder_name.to_string(),
                reason: format!("parent build {parent} does not exist"),
            });
        }

        inner.next_request += 1;
        let id = BuildRequestId::new(inner.next_request);
        inner.requests.insert(
            id,
            BuildRequest {
                id,
                builder_name: request.builder_name.clone(),
                parent_build_id: request.parent_build_id,
                source: request.source.clone(),
                submitted_at: Utc::now(),
            },
        );
        Ok(id)
    }
}
