//! Fan-in barrier: which downstream builders a build at its join step must
//! start.
//!
//! There is no lock and no persisted join record. Every evaluation re-reads
//! the build tree of the root and decides from that alone. When several
//! required builds sit at the join step together, only the one that entered
//! it last (by step start time, then build id) fires; every other evaluator
//! defers to it. That ordering is the only concurrency control.

use crate::dag::{BuilderId, DependencyGraph, Trigger};
use crate::walker::{BuildTreeSnapshot, BuildTreeWalker};
use cascade_core::build::{BuildRecord, BuildStatus};
use cascade_core::change::SourceMetadata;
use cascade_core::ids::{BuildId, BuilderName};
use cascade_core::ports::BuildStore;
use cascade_core::{Error, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Outcome of evaluating one target builder for one evaluating build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// This build is responsible for starting the target.
    Fire,
    /// Required builds have not reached the join step yet.
    NotReady { waiting_on: BTreeSet<BuilderName> },
    /// A sibling entered the join step later and will fire instead.
    Deferred { winner: BuildId },
    /// A sibling is at the join step but its start time is not recorded yet.
    Undecidable { builder: BuilderName },
    /// A required build ended without passing; the join is dead for this root.
    Blocked {
        builder: BuilderName,
        status: BuildStatus,
    },
    /// A newer build of the evaluating builder exists under the same root.
    Superseded { newer: BuildId },
}

impl Verdict {
    pub fn fires(&self) -> bool {
        matches!(self, Verdict::Fire)
    }

    // Strength when several triggers of one target disagree.
    fn rank(&self) -> u8 {
        match self {
            Verdict::Fire => 5,
            Verdict::Deferred { .. } => 4,
            Verdict::Undecidable { .. } => 3,
            Verdict::NotReady { .. } => 2,
            Verdict::Superseded { .. } => 1,
            Verdict::Blocked { .. } => 0,
        }
    }

    fn strongest(self, other: Verdict) -> Verdict {
        match self.rank().cmp(&other.rank()) {
            Ordering::Less => other,
            _ => self,
        }
    }
}

/// Lifecycle of one target builder under one root, as seen by one evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    NotEligible,
    Eligible,
    Firing,
    BuildCreated,
    PermanentlyBlocked,
}

impl From<&Verdict> for JoinState {
    fn from(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Fire => JoinState::Eligible,
            Verdict::Blocked { .. } => JoinState::PermanentlyBlocked,
            _ => JoinState::NotEligible,
        }
    }
}

impl std::fmt::Display for JoinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JoinState::NotEligible => "not_eligible",
            JoinState::Eligible => "eligible",
            JoinState::Firing => "firing",
            JoinState::BuildCreated => "build_created",
            JoinState::PermanentlyBlocked => "permanently_blocked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDecision {
    pub target: BuilderName,
    pub verdict: Verdict,
}

impl TargetDecision {
    pub fn state(&self) -> JoinState {
        JoinState::from(&self.verdict)
    }
}

/// Every decision taken by one evaluation, ordered by target name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinResolution {
    pub decisions: Vec<TargetDecision>,
}

impl JoinResolution {
    /// Builders this evaluation must start.
    pub fn targets(&self) -> BTreeSet<BuilderName> {
        self.decisions
            .iter()
            .filter(|d| d.verdict.fires())
            .map(|d| d.target.clone())
            .collect()
    }

    pub fn decision(&self, target: &str) -> Option<&TargetDecision> {
        self.decisions.iter().find(|d| d.target == *target)
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// How far one required builder is from letting a join through.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    /// Passed. `joined` is when it entered the join step, if recorded.
    Satisfied {
        joined: Option<(DateTime<Utc>, BuildId)>,
    },
    AtJoin {
        started_at: Option<DateTime<Utc>>,
        build_id: BuildId,
    },
    Pending,
    Blocked(BuildStatus),
    Superseded(BuildId),
}

pub struct BarrierResolver {
    graph: Arc<DependencyGraph>,
    walker: BuildTreeWalker,
}

impl BarrierResolver {
    pub fn new(graph: Arc<DependencyGraph>, store: Arc<dyn BuildStore>) -> Self {
        Self {
            walker: BuildTreeWalker::new(store, graph.clone()),
            graph,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Decide which downstream builders `build` must start now.
    ///
    /// `build.status` is the build's result so far; anything but `Passed`
    /// returns an empty resolution without touching the store.
    pub async fn on_build_reached_join_point(
        &self,
        build: &BuildRecord,
        source: &SourceMetadata,
    ) -> Result<JoinResolution> {
        if !build.status.is_success() {
            debug!(builder = %build.builder_name, status = %build.status, "Build did not pass, nothing to trigger");
            return Ok(JoinResolution::default());
        }
        let build_id = build.id.ok_or_else(|| {
            Error::Internal(format!(
                "join point reached by a {} build without id",
                build.builder_name
            ))
        })?;
        let Some(builder) = self.graph.resolve(build.builder_name.as_str()) else {
            debug!(build_id = %build_id, builder = %build.builder_name, "Builder is not part of the graph");
            return Ok(JoinResolution::default());
        };

        if builder == self.graph.root() {
            return Ok(self.resolve_root(source));
        }

        let snapshot = self.walker.snapshot(build_id).await?;
        Ok(self.resolve(build, builder, source, &snapshot))
    }

    /// The root starts every matching unconditional trigger.
    fn resolve_root(&self, source: &SourceMetadata) -> JoinResolution {
        let mut verdicts: BTreeMap<BuilderName, Verdict> = BTreeMap::new();
        for (target, trigger) in self.graph.downstream_of(self.graph.root()) {
            if trigger.filter.matches_source(source) {
                verdicts.insert(self.graph.name(target).clone(), Verdict::Fire);
            }
        }
        Self::collect(verdicts)
    }

    /// Pure decision from an already taken snapshot.
    pub fn resolve(
        &self,
        build: &BuildRecord,
        builder: BuilderId,
        source: &SourceMetadata,
        snapshot: &BuildTreeSnapshot,
    ) -> JoinResolution {
        let Some(build_id) = build.id else {
            return JoinResolution::default();
        };
        let mut verdicts: BTreeMap<BuilderName, Verdict> = BTreeMap::new();

        for (target, trigger) in self.graph.downstream_of(builder) {
            let target_name = self.graph.name(target);
            if !trigger.filter.matches_source(source) {
                debug!(target = %target_name, changed = %source.changed_repo(), "Change filtered out by trigger");
                continue;
            }
            let verdict = self.evaluate(trigger, build, build_id, builder, snapshot);
            let merged = match verdicts.remove(target_name) {
                Some(previous) => previous.strongest(verdict),
                None => verdict,
            };
            verdicts.insert(target_name.clone(), merged);
        }

        Self::collect(verdicts)
    }

    fn collect(verdicts: BTreeMap<BuilderName, Verdict>) -> JoinResolution {
        JoinResolution {
            decisions: verdicts
                .into_iter()
                .map(|(target, verdict)| TargetDecision { target, verdict })
                .collect(),
        }
    }

    fn evaluate(
        &self,
        trigger: &Trigger,
        build: &BuildRecord,
        build_id: BuildId,
        builder: BuilderId,
        snapshot: &BuildTreeSnapshot,
    ) -> Verdict {
        let mut waiting_on = BTreeSet::new();
        let mut at_join = Vec::new();
        let mut completed = Vec::new();
        let mut superseded = None;

        for &required in &trigger.required {
            let name = self.graph.name(required);
            match self.readiness(required, build, build_id, builder, snapshot) {
                Readiness::Satisfied { joined } => completed.extend(joined),
                Readiness::Blocked(status) => {
                    return Verdict::Blocked {
                        builder: name.clone(),
                        status,
                    };
                }
                Readiness::Superseded(newer) => superseded = Some(newer),
                Readiness::Pending => {
                    waiting_on.insert(name.clone());
                }
                Readiness::AtJoin { started_at, build_id: id } => {
                    at_join.push((started_at, id, name))
                }
            }
        }

        if let Some(newer) = superseded {
            return Verdict::Superseded { newer };
        }
        if !waiting_on.is_empty() {
            return Verdict::NotReady { waiting_on };
        }
        // Alone at the join step and no sibling went through it.
        if at_join.len() <= 1 && completed.is_empty() {
            return Verdict::Fire;
        }

        // Passed siblings compete with the time they entered the join step.
        let mut stamped = completed;
        for (started_at, id, name) in at_join {
            match started_at {
                Some(at) => stamped.push((at, id)),
                None => {
                    return Verdict::Undecidable {
                        builder: name.clone(),
                    };
                }
            }
        }
        match stamped.into_iter().max() {
            Some((_, winner)) if winner != build_id => Verdict::Deferred { winner },
            _ => Verdict::Fire,
        }
    }

    fn readiness(
        &self,
        required: BuilderId,
        build: &BuildRecord,
        build_id: BuildId,
        builder: BuilderId,
        snapshot: &BuildTreeSnapshot,
    ) -> Readiness {
        let record = snapshot.get(required);

        if required == builder {
            return match record {
                Some(BuildRecord { id: Some(id), .. }) if *id > build_id => {
                    Readiness::Superseded(*id)
                }
                Some(r) if r.id == Some(build_id) => Readiness::AtJoin {
                    started_at: r.current_step_started_at.or(build.current_step_started_at),
                    build_id,
                },
                _ => Readiness::AtJoin {
                    started_at: build.current_step_started_at,
                    build_id,
                },
            };
        }

        let Some(record) = record else {
            return Readiness::Pending;
        };
        match record.status {
            status if status.is_success() => Readiness::Satisfied {
                joined: snapshot.completed_join_at(required).zip(record.id),
            },
            BuildStatus::Skipped if !self.graph.skipped_blocks() => {
                Readiness::Satisfied { joined: None }
            }
            status if status.is_terminal() => Readiness::Blocked(status),
            BuildStatus::Running if record.is_at_step(self.graph.join_step()) => match record.id {
                Some(id) => Readiness::AtJoin {
                    started_at: record.current_step_started_at,
                    build_id: id,
                },
                None => Readiness::Pending,
            },
            _ => Readiness::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DependencyGraphBuilder;
    use crate::triggers::ChangeFilter;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_or_prefers_strongest_verdict() {
        let blocked = Verdict::Blocked {
            builder: BuilderName::new("a"),
            status: BuildStatus::Failed,
        };
        let waiting = Verdict::NotReady {
            waiting_on: BTreeSet::from([BuilderName::new("b")]),
        };
        assert_eq!(blocked.clone().strongest(waiting.clone()), waiting);
        assert_eq!(waiting.strongest(Verdict::Fire), Verdict::Fire);
        assert_eq!(
            Verdict::Deferred {
                winner: BuildId::new(3)
            }
            .strongest(blocked),
            Verdict::Deferred {
                winner: BuildId::new(3)
            }
        );
    }

    #[test]
    fn test_join_state_from_verdict() {
        assert_eq!(JoinState::from(&Verdict::Fire), JoinState::Eligible);
        assert_eq!(
            JoinState::from(&Verdict::Blocked {
                builder: BuilderName::new("a"),
                status: BuildStatus::Cancelled
            }),
            JoinState::PermanentlyBlocked
        );
        assert_eq!(
            JoinState::from(&Verdict::Undecidable {
                builder: BuilderName::new("a")
            }),
            JoinState::NotEligible
        );
    }

    #[tokio::test]
    async fn test_failed_build_returns_nothing() {
        let filter: Arc<dyn ChangeFilter> = Arc::new(|_: &str, _: &str, _: Option<&str>| true);
        let graph = DependencyGraphBuilder::new("trigger")
            .builder("a")
            .and_then(|b| b.trigger("a", &[], filter))
            .and_then(|b| b.build())
            .unwrap();
        let store = Arc::new(crate::memory::InMemoryBuildStore::new());
        let resolver = BarrierResolver::new(Arc::new(graph), store);

        let mut build = BuildRecord::not_started(BuilderName::new("trigger"));
        build.id = Some(BuildId::new(1));
        build.status = BuildStatus::Failed;
        let source = SourceMetadata {
            repository: "media-driver".to_string(),
            branch: "master".to_string(),
            target_branch: None,
            revision: "abc".to_string(),
        };

        let resolution = resolver
            .on_build_reached_join_point(&build, &source)
            .await
            .unwrap();
        assert!(resolution.is_empty());

        build.status = BuildStatus::Passed;
        let resolution = resolver
            .on_build_reached_join_point(&build, &source)
            .await
            .unwrap();
        assert_eq!(
            resolution.targets(),
            BTreeSet::from([BuilderName::new("a")])
        );
    }
}
