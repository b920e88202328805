//! End-to-end join scenarios through the scheduler facade.

use cascade_core::build::BuildStatus;
use cascade_core::change::{ChangeEvent, SourceMetadata};
use cascade_core::ids::{BuildId, BuilderName};
use cascade_scheduler::dag::DependencyGraphBuilder;
use cascade_scheduler::memory::InMemoryBuildStore;
use cascade_scheduler::triggers::{BranchFilter, ChangeFilter};
use cascade_scheduler::{DependencyGraph, JoinReport, JoinState, Scheduler, Verdict};
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;

fn any_change() -> Arc<dyn ChangeFilter> {
    Arc::new(|_: &str, _: &str, _: Option<&str>| true)
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 6, 3, 10, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn commit(branch: &str) -> ChangeEvent {
    ChangeEvent {
        repository: "https://github.com/intel/media-driver.git".to_string(),
        branch: branch.to_string(),
        target_branch: None,
        revision: "5d7a3a1c".to_string(),
        category: None,
    }
}

/// `{a, b} -> c -> d`, both `a` and `b` started by the root.
fn fan_in(skipped_blocks: bool) -> DependencyGraph {
    DependencyGraphBuilder::new("trigger")
        .skipped_blocks(skipped_blocks)
        .builder("a")
        .and_then(|b| b.builder("b"))
        .and_then(|b| b.builder("c"))
        .and_then(|b| b.builder("d"))
        .and_then(|b| b.trigger("a", &[], any_change()))
        .and_then(|b| b.trigger("b", &[], any_change()))
        .and_then(|b| b.trigger("c", &["a", "b"], any_change()))
        .and_then(|b| b.trigger("d", &["c"], any_change()))
        .and_then(|b| b.build())
        .unwrap()
}

struct Harness {
    store: Arc<InMemoryBuildStore>,
    scheduler: Scheduler,
    source: SourceMetadata,
}

impl Harness {
    fn new(graph: DependencyGraph) -> Self {
        Self::on_branch(graph, "master")
    }

    fn on_branch(graph: DependencyGraph, branch: &str) -> Self {
        let store = Arc::new(InMemoryBuildStore::new());
        let scheduler = Scheduler::new(Arc::new(graph), store.clone(), store.clone());
        Self {
            store,
            scheduler,
            source: commit(branch).source(),
        }
    }

    /// Run the root build through its join point.
    async fn root(&self) -> (BuildId, JoinReport) {
        let request = self.scheduler.handle_change(&commit(&self.source.branch)).await.unwrap();
        let root = self.store.start_build(request).await.unwrap();
        let report = self.join(root, 0).await;
        self.store.finish_build(root, BuildStatus::Passed).await.unwrap();
        (root, report)
    }

    /// Start the most recently requested build of `builder`.
    async fn start(&self, builder: &str) -> BuildId {
        let request = self
            .store
            .requests_for(builder)
            .await
            .last()
            .map(|r| r.id)
            .unwrap_or_else(|| panic!("no request for {builder}"));
        self.store.start_build(request).await.unwrap()
    }

    async fn enter_join(&self, build: BuildId, seconds: i64) {
        self.store.enter_step(build, "trigger", Some(at(seconds))).await.unwrap();
    }

    async fn evaluate(&self, build: BuildId) -> JoinReport {
        self.scheduler
            .on_join_point(build, BuildStatus::Passed, &self.source)
            .await
            .unwrap()
    }

    async fn join(&self, build: BuildId, seconds: i64) -> JoinReport {
        self.enter_join(build, seconds).await;
        self.evaluate(build).await
    }

    async fn requested(&self, builder: &str) -> usize {
        self.store.requests_for(builder).await.len()
    }
}

fn names(list: &[&str]) -> BTreeSet<BuilderName> {
    list.iter().map(|n| BuilderName::new(*n)).collect()
}

#[tokio::test]
async fn test_handle_change_requests_root() {
    let h = Harness::new(fan_in(true));
    let request = h.scheduler.handle_change(&commit("master")).await.unwrap();

    let requests = h.store.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, request);
    assert_eq!(requests[0].builder_name, BuilderName::new("trigger"));
    assert!(requests[0].parent_build_id.is_none());
    assert_eq!(requests[0].source.revision, "5d7a3a1c");
}

#[tokio::test]
async fn test_root_fires_unconditional_builders() {
    let h = Harness::new(fan_in(true));
    let (root, report) = h.root().await;

    let fired: BTreeSet<BuilderName> = report.fired().into_iter().cloned().collect();
    assert_eq!(fired, names(&["a", "b"]));
    assert_eq!(report.state("a"), JoinState::BuildCreated);
    for request in h.store.requests_for("a").await {
        assert_eq!(request.parent_build_id, Some(root));
    }
    assert_eq!(h.requested("c").await, 0);
}

#[tokio::test]
async fn test_sequential_siblings_fire_once_from_the_later() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;

    let report_a = h.join(a, 10).await;
    assert_eq!(
        report_a.verdict("c"),
        Some(&Verdict::NotReady {
            waiting_on: names(&["b"])
        })
    );
    assert!(report_a.created.is_empty());
    h.store.finish_build(a, BuildStatus::Passed).await.unwrap();

    let report_b = h.join(b, 12).await;
    assert_eq!(report_b.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(report_b.state("c"), JoinState::BuildCreated);
    assert_eq!(h.requested("c").await, 1);

    let request = &h.store.requests_for("c").await[0];
    assert_eq!(request.parent_build_id, Some(b));
}

#[tokio::test]
async fn test_concurrent_siblings_latest_join_wins() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 10).await;
    h.enter_join(b, 12).await;

    let report_a = h.evaluate(a).await;
    assert_eq!(report_a.verdict("c"), Some(&Verdict::Deferred { winner: b }));
    assert_eq!(report_a.state("c"), JoinState::NotEligible);

    let report_b = h.evaluate(b).await;
    assert_eq!(report_b.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_concurrent_siblings_winner_independent_of_evaluation_order() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 15).await;
    h.enter_join(b, 12).await;

    let report_b = h.evaluate(b).await;
    assert_eq!(report_b.verdict("c"), Some(&Verdict::Deferred { winner: a }));
    let report_a = h.evaluate(a).await;
    assert_eq!(report_a.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_winner_finishing_first_still_fires_once() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 10).await;
    h.enter_join(b, 12).await;

    assert_eq!(h.evaluate(b).await.verdict("c"), Some(&Verdict::Fire));
    h.store.finish_build(b, BuildStatus::Passed).await.unwrap();

    // b has left the join step, but it entered it after a did.
    let report_a = h.evaluate(a).await;
    assert_eq!(report_a.verdict("c"), Some(&Verdict::Deferred { winner: b }));
    assert!(report_a.created.is_empty());
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_passed_sibling_that_joined_earlier_does_not_hold_back() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 10).await;
    h.enter_join(b, 12).await;

    // a deferred to b, then finished.
    assert_eq!(
        h.evaluate(a).await.verdict("c"),
        Some(&Verdict::Deferred { winner: b })
    );
    h.store.finish_build(a, BuildStatus::Passed).await.unwrap();

    assert_eq!(h.evaluate(b).await.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_equal_timestamps_break_ties_by_build_id() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    assert!(b > a);
    h.enter_join(a, 10).await;
    h.enter_join(b, 10).await;

    assert_eq!(
        h.evaluate(a).await.verdict("c"),
        Some(&Verdict::Deferred { winner: b })
    );
    assert_eq!(h.evaluate(b).await.verdict("c"), Some(&Verdict::Fire));
}

#[tokio::test]
async fn test_failed_upstream_blocks_forever() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(a, BuildStatus::Failed).await.unwrap();

    for round in 0..3 {
        let report = h.join(b, 12 + round).await;
        assert_eq!(
            report.verdict("c"),
            Some(&Verdict::Blocked {
                builder: BuilderName::new("a"),
                status: BuildStatus::Failed
            })
        );
        assert_eq!(report.state("c"), JoinState::PermanentlyBlocked);
    }
    assert_eq!(h.requested("c").await, 0);
}

#[tokio::test]
async fn test_failed_evaluator_fires_nothing() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    h.store.finish_build(h.start("b").await, BuildStatus::Passed).await.unwrap();
    h.enter_join(a, 10).await;

    for status in [BuildStatus::Failed, BuildStatus::Cancelled, BuildStatus::HasWarnings] {
        let report = h.scheduler.on_join_point(a, status, &h.source).await.unwrap();
        assert!(report.decisions.is_empty());
    }
    assert_eq!(h.requested("c").await, 0);
}

#[tokio::test]
async fn test_cancelled_and_exception_block() {
    for status in [BuildStatus::Cancelled, BuildStatus::HasException, BuildStatus::Skipped] {
        let h = Harness::new(fan_in(true));
        h.root().await;
        let a = h.start("a").await;
        let b = h.start("b").await;
        h.store.finish_build(a, status).await.unwrap();

        let report = h.join(b, 12).await;
        assert_eq!(report.state("c"), JoinState::PermanentlyBlocked);
        assert_eq!(h.requested("c").await, 0);
    }
}

#[tokio::test]
async fn test_skipped_upstream_may_be_non_blocking() {
    let h = Harness::new(fan_in(false));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(a, BuildStatus::Skipped).await.unwrap();

    let report = h.join(b, 12).await;
    assert_eq!(report.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_sibling_without_join_timestamp_is_undecidable() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    // a is inside the join step but its start is still being written.
    h.store.enter_step(a, "trigger", None).await.unwrap();
    h.enter_join(b, 12).await;

    let report = h.evaluate(b).await;
    assert_eq!(
        report.verdict("c"),
        Some(&Verdict::Undecidable {
            builder: BuilderName::new("a")
        })
    );
    assert_eq!(h.requested("c").await, 0);

    // Once the write lands, the sibling that entered last fires.
    h.store.record_step_start(a, "trigger", at(13)).await.unwrap();
    assert_eq!(
        h.evaluate(b).await.verdict("c"),
        Some(&Verdict::Deferred { winner: a })
    );
    assert_eq!(h.evaluate(a).await.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_undecidable_round_is_recovered_by_sibling() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 10).await;
    h.store.enter_step(b, "trigger", None).await.unwrap();

    // a cannot see when b arrived.
    assert!(matches!(
        h.evaluate(a).await.verdict("c"),
        Some(Verdict::Undecidable { .. })
    ));

    h.store.record_step_start(b, "trigger", at(12)).await.unwrap();
    assert_eq!(h.evaluate(b).await.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_repeated_evaluation_is_deterministic() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.enter_join(a, 20).await;
    h.enter_join(b, 11).await;

    for _ in 0..5 {
        assert_eq!(
            h.evaluate(b).await.verdict("c"),
            Some(&Verdict::Deferred { winner: a })
        );
    }
    assert_eq!(h.requested("c").await, 0);
}

#[tokio::test]
async fn test_older_duplicate_is_superseded() {
    let h = Harness::new(fan_in(true));
    let (root, _) = h.root().await;
    let old_a = h.start("a").await;
    // A racing trigger step created a second request for a.
    h.store.request("a", Some(root), h.source.clone()).await.unwrap();
    let new_a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(b, BuildStatus::Passed).await.unwrap();

    let report = h.join(old_a, 10).await;
    assert_eq!(report.verdict("c"), Some(&Verdict::Superseded { newer: new_a }));
    assert_eq!(h.requested("c").await, 0);

    let report = h.join(new_a, 11).await;
    assert_eq!(report.verdict("c"), Some(&Verdict::Fire));
    assert_eq!(h.requested("c").await, 1);
}

#[tokio::test]
async fn test_chain_continues_downstream() {
    let h = Harness::new(fan_in(true));
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(a, BuildStatus::Passed).await.unwrap();
    h.join(b, 12).await;
    h.store.finish_build(b, BuildStatus::Passed).await.unwrap();

    let c = h.start("c").await;
    let report = h.join(c, 30).await;
    assert_eq!(report.verdict("d"), Some(&Verdict::Fire));
    assert_eq!(h.requested("d").await, 1);
}

fn filtered(branches: &[&str]) -> Arc<dyn ChangeFilter> {
    Arc::new(BranchFilter::new(
        vec![],
        branches.iter().map(|b| b.to_string()).collect(),
        vec![],
    ))
}

#[tokio::test]
async fn test_filter_mismatch_skips_target() {
    let graph = DependencyGraphBuilder::new("trigger")
        .builder("a")
        .and_then(|b| b.builder("c"))
        .and_then(|b| b.trigger("a", &[], any_change()))
        .and_then(|b| b.trigger("c", &["a"], filtered(&["release/*"])))
        .and_then(|b| b.build())
        .unwrap();
    let h = Harness::new(graph);
    h.root().await;
    let a = h.start("a").await;

    let report = h.join(a, 10).await;
    assert!(report.verdict("c").is_none());
    assert_eq!(h.requested("c").await, 0);
}

#[tokio::test]
async fn test_root_respects_filters() {
    let graph = DependencyGraphBuilder::new("trigger")
        .builder("a")
        .and_then(|b| b.builder("b"))
        .and_then(|b| b.trigger("a", &[], filtered(&["master"])))
        .and_then(|b| b.trigger("b", &[], filtered(&["release/*"])))
        .and_then(|b| b.build())
        .unwrap();
    let h = Harness::new(graph);
    let (_, report) = h.root().await;

    let fired: Vec<&BuilderName> = report.fired();
    assert_eq!(fired, vec![&BuilderName::new("a")]);
}

/// `d` starts when both `a` and `b` pass, or on release branches when `b`
/// alone passes.
fn either_trigger() -> DependencyGraph {
    DependencyGraphBuilder::new("trigger")
        .builder("a")
        .and_then(|b| b.builder("b"))
        .and_then(|b| b.builder("d"))
        .and_then(|b| b.trigger("a", &[], any_change()))
        .and_then(|b| b.trigger("b", &[], any_change()))
        .and_then(|b| b.trigger("d", &["a", "b"], any_change()))
        .and_then(|b| b.trigger("d", &["b"], filtered(&["release/*"])))
        .and_then(|b| b.build())
        .unwrap()
}

#[tokio::test]
async fn test_any_satisfied_trigger_makes_target_eligible() {
    let h = Harness::on_branch(either_trigger(), "release/2019");
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(a, BuildStatus::Failed).await.unwrap();

    let report = h.join(b, 12).await;
    assert_eq!(report.verdict("d"), Some(&Verdict::Fire));
    assert_eq!(h.requested("d").await, 1);
}

#[tokio::test]
async fn test_every_trigger_blocked_blocks_target() {
    let h = Harness::new(either_trigger());
    h.root().await;
    let a = h.start("a").await;
    let b = h.start("b").await;
    h.store.finish_build(a, BuildStatus::Failed).await.unwrap();

    let report = h.join(b, 12).await;
    assert_eq!(report.state("d"), JoinState::PermanentlyBlocked);
    assert_eq!(h.requested("d").await, 0);
}

#[tokio::test]
async fn test_unknown_build_is_reported() {
    let h = Harness::new(fan_in(true));
    let err = h
        .scheduler
        .on_join_point(BuildId::new(404), BuildStatus::Passed, &h.source)
        .await
        .unwrap_err();
    assert!(matches!(err, cascade_core::Error::BuildNotFound(_)));
}
