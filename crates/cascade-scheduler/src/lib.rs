//! Fan-in trigger scheduling for Cascade CI.
//!
//! A build that reaches its join step asks [`scheduler::Scheduler`] which
//! downstream builders it is responsible for starting. The answer is derived
//! from scratch on every call from the build history of the same root.

pub mod barrier;
pub mod dag;
pub mod dispatcher;
pub mod memory;
pub mod scheduler;
pub mod triggers;
pub mod walker;

pub use barrier::{BarrierResolver, JoinResolution, JoinState, TargetDecision, Verdict};
pub use dag::{BuilderId, DagError, DependencyGraph, Trigger};
pub use dispatcher::TriggerDispatcher;
pub use scheduler::{JoinReport, Scheduler};
pub use walker::{BuildTreeSnapshot, BuildTreeWalker};
