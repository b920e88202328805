//! Discovery of every build descended from one root build.

use crate::dag::{BuilderId, DependencyGraph};
use cascade_core::build::{BuildRecord, BuildStatus};
use cascade_core::ids::BuildId;
use cascade_core::ports::BuildStore;
use cascade_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Most recent build per builder under one root.
///
/// Builders of the graph that have no build yet are present as synthetic
/// `NotStarted` records.
#[derive(Debug, Clone)]
pub struct BuildTreeSnapshot {
    root: BuildRecord,
    builds: HashMap<BuilderId, BuildRecord>,
    completed_joins: HashMap<BuilderId, DateTime<Utc>>,
}

impl BuildTreeSnapshot {
    pub fn root(&self) -> &BuildRecord {
        &self.root
    }

    pub fn get(&self, builder: BuilderId) -> Option<&BuildRecord> {
        self.builds.get(&builder)
    }

    /// When a passed build of `builder` entered the join step, if the store
    /// recorded it.
    pub fn completed_join_at(&self, builder: BuilderId) -> Option<DateTime<Utc>> {
        self.completed_joins.get(&builder).copied()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}

/// Walks the build history of one root event.
#[derive(Clone)]
pub struct BuildTreeWalker {
    store: Arc<dyn BuildStore>,
    graph: Arc<DependencyGraph>,
}

impl BuildTreeWalker {
    pub fn new(store: Arc<dyn BuildStore>, graph: Arc<DependencyGraph>) -> Self {
        Self { store, graph }
    }

    /// Snapshot of the whole tree that `build_id` belongs to.
    pub async fn snapshot(&self, build_id: BuildId) -> Result<BuildTreeSnapshot> {
        let root = self.find_root(build_id).await?;
        let builds = self.descend(&root).await?;
        let completed_joins = self.completed_joins(&builds).await?;
        Ok(BuildTreeSnapshot {
            root,
            builds,
            completed_joins,
        })
    }

    /// Climb parent links until a build without a parent.
    pub async fn find_root(&self, build_id: BuildId) -> Result<BuildRecord> {
        let mut seen = HashSet::new();
        let mut current = build_id;
        loop {
            if !seen.insert(current) {
                return Err(Error::InconsistentHistory(format!(
                    "parent chain of {build_id} loops at {current}"
                )));
            }
            let build = self
                .store
                .get_build(current)
                .await?
                .ok_or(Error::BuildNotFound(current))?;
            match build.parent_build_id {
                Some(parent) => current = parent,
                None => return Ok(build),
            }
        }
    }

    async fn descend(&self, root: &BuildRecord) -> Result<HashMap<BuilderId, BuildRecord>> {
        let mut builds: HashMap<BuilderId, BuildRecord> = HashMap::new();
        let root_id = root.id.ok_or_else(|| {
            Error::InconsistentHistory(format!("root of {} has no id", root.builder_name))
        })?;
        if let Some(builder) = self.graph.resolve(root.builder_name.as_str()) {
            builds.insert(builder, self.with_join_step(root.clone()).await?);
        }

        let mut queue = VecDeque::from([root_id]);
        let mut visited = HashSet::from([root_id]);

        while let Some(parent) = queue.pop_front() {
            for request in self.store.get_build_requests_for_parent(parent).await? {
                let Some(builder) = self.graph.resolve(request.builder_name.as_str()) else {
                    debug!(builder = %request.builder_name, request_id = %request.id, "Ignoring build request for undeclared builder");
                    continue;
                };

                let candidates = self.store.get_builds(request.id).await?;
                let Some(latest) = candidates.into_iter().max_by_key(|b| b.id) else {
                    builds
                        .entry(builder)
                        .or_insert_with(|| BuildRecord::not_started(request.builder_name.clone()));
                    continue;
                };
                let Some(latest_id) = latest.id else {
                    continue;
                };

                match builds.get(&builder).and_then(|existing| existing.id) {
                    Some(existing_id) if existing_id >= latest_id => {
                        warn!(
                            root_id = %root_id,
                            builder = %request.builder_name,
                            kept = %existing_id,
                            ignored = %latest_id,
                            "Several builds of one builder under the same root"
                        );
                        continue;
                    }
                    Some(existing_id) => {
                        warn!(
                            root_id = %root_id,
                            builder = %request.builder_name,
                            kept = %latest_id,
                            ignored = %existing_id,
                            "Several builds of one builder under the same root"
                        );
                    }
                    None => {}
                }

                builds.insert(builder, self.with_join_step(latest).await?);
                if visited.insert(latest_id) {
                    queue.push_back(latest_id);
                }
            }
        }

        for builder in self.graph.builders() {
            builds
                .entry(builder)
                .or_insert_with(|| BuildRecord::not_started(self.graph.name(builder).clone()));
        }

        Ok(builds)
    }

    /// Join-step start times of passed builds, read from their step records.
    async fn completed_joins(
        &self,
        builds: &HashMap<BuilderId, BuildRecord>,
    ) -> Result<HashMap<BuilderId, DateTime<Utc>>> {
        let join_step = self.graph.join_step();
        let mut joins = HashMap::new();
        for (&builder, build) in builds {
            if !build.status.is_success() {
                continue;
            }
            if let Some(id) = build.id
                && let Some(step) = self.store.get_step(id, join_step).await?
                && let Some(at) = step.started_at
            {
                joins.insert(builder, at);
            }
        }
        Ok(joins)
    }

    /// Fill in the join-step start time of a running build that is at the
    /// join step, as recorded on the step itself.
    async fn with_join_step(&self, mut build: BuildRecord) -> Result<BuildRecord> {
        let join_step = self.graph.join_step();
        if build.status != BuildStatus::Running || !build.is_at_step(join_step) {
            build.current_step_started_at = None;
            return Ok(build);
        }
        if let Some(id) = build.id
            && let Some(step) = self.store.get_step(id, join_step).await?
        {
            build.current_step_started_at = step.started_at;
        }
        Ok(build)
    }
}
