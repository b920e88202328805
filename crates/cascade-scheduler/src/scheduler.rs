//! Scheduler facade wiring the graph, the barrier and the dispatcher.

use crate::barrier::{BarrierResolver, JoinState, TargetDecision, Verdict};
use crate::dag::DependencyGraph;
use crate::dispatcher::TriggerDispatcher;
use cascade_core::build::{BuildStatus, StepRecord};
use cascade_core::change::{ChangeEvent, SourceMetadata};
use cascade_core::ids::{BuildId, BuildRequestId, BuilderName};
use cascade_core::ports::{BuildRequester, BuildStore};
use cascade_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one join-point evaluation decided and requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub build_id: BuildId,
    pub decisions: Vec<TargetDecision>,
    pub created: Vec<(BuilderName, BuildRequestId)>,
}

impl JoinReport {
    fn empty(build_id: BuildId) -> Self {
        Self {
            build_id,
            decisions: vec![],
            created: vec![],
        }
    }

    /// Targets this evaluation started.
    pub fn fired(&self) -> Vec<&BuilderName> {
        self.created.iter().map(|(name, _)| name).collect()
    }

    pub fn verdict(&self, target: &str) -> Option<&Verdict> {
        self.decisions
            .iter()
            .find(|d| d.target == *target)
            .map(|d| &d.verdict)
    }

    /// Final state of `target` after this evaluation.
    pub fn state(&self, target: &str) -> JoinState {
        if self.created.iter().any(|(name, _)| *name == *target) {
            return JoinState::BuildCreated;
        }
        self.decisions
            .iter()
            .find(|d| d.target == *target)
            .map(TargetDecision::state)
            .unwrap_or(JoinState::NotEligible)
    }
}

pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    store: Arc<dyn BuildStore>,
    resolver: BarrierResolver,
    dispatcher: TriggerDispatcher,
}

impl Scheduler {
    pub fn new(
        graph: Arc<DependencyGraph>,
        store: Arc<dyn BuildStore>,
        requester: Arc<dyn BuildRequester>,
    ) -> Self {
        Self {
            resolver: BarrierResolver::new(graph.clone(), store.clone()),
            dispatcher: TriggerDispatcher::new(requester),
            graph,
            store,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Request the root build for a change.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<BuildRequestId> {
        let root = self.graph.name(self.graph.root());
        self.dispatcher.fire_root(root, event).await
    }

    /// Evaluate the join point of `build_id`, whose results so far are
    /// `results`, and request every downstream build it is responsible for.
    pub async fn on_join_point(
        &self,
        build_id: BuildId,
        results: BuildStatus,
        source: &SourceMetadata,
    ) -> Result<JoinReport> {
        let mut build = self
            .store
            .get_build(build_id)
            .await?
            .ok_or(Error::BuildNotFound(build_id))?;
        build.status = results;

        if !results.is_success() {
            debug!(build_id = %build_id, builder = %build.builder_name, status = %results, "Skipping join evaluation");
            return Ok(JoinReport::empty(build_id));
        }

        if build.current_step_started_at.is_none()
            && let Some(StepRecord {
                started_at: Some(at),
                ..
            }) = self.store.get_step(build_id, self.graph.join_step()).await?
        {
            build.current_step_started_at = Some(at);
        }

        let resolution = self
            .resolver
            .on_build_reached_join_point(&build, source)
            .await?;

        for decision in &resolution.decisions {
            log_decision(build_id, decision);
        }

        let targets = resolution.targets();
        let mut report = JoinReport {
            build_id,
            decisions: resolution.decisions,
            created: vec![],
        };
        if targets.is_empty() {
            return Ok(report);
        }

        for target in &targets {
            info!(build_id = %build_id, target = %target, from = %JoinState::Eligible, to = %JoinState::Firing, "Join state changed");
        }
        report.created = self.dispatcher.fire(&targets, build_id, source).await?;
        for (target, request_id) in &report.created {
            info!(build_id = %build_id, target = %target, request_id = %request_id, from = %JoinState::Firing, to = %JoinState::BuildCreated, "Join state changed");
        }

        Ok(report)
    }
}

fn log_decision(build_id: BuildId, decision: &TargetDecision) {
    let target = &decision.target;
    match &decision.verdict {
        Verdict::Fire => {
            info!(build_id = %build_id, target = %target, from = %JoinState::NotEligible, to = %JoinState::Eligible, "Join state changed");
        }
        Verdict::Blocked { builder, status } => {
            info!(
                build_id = %build_id,
                target = %target,
                upstream = %builder,
                status = %status,
                to = %JoinState::PermanentlyBlocked,
                "Join permanently blocked for this root"
            );
        }
        Verdict::Deferred { winner } => {
            debug!(build_id = %build_id, target = %target, winner = %winner, "Later sibling will fire");
        }
        Verdict::Undecidable { builder } => {
            debug!(build_id = %build_id, target = %target, upstream = %builder, "Sibling at join step has no recorded start time");
        }
        Verdict::NotReady { waiting_on } => {
            debug!(build_id = %build_id, target = %target, waiting_on = ?waiting_on, "Join not ready");
        }
        Verdict::Superseded { newer } => {
            warn!(build_id = %build_id, target = %target, newer = %newer, "Superseded by a newer build of the same builder");
        }
    }
}
