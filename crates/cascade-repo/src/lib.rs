//! Repository state management for build stages.
//!
//! Clones, updates and checks out the repositories a build needs, either at
//! a pinned commit, at the last commit before a point in time, or at the
//! branch head. Transport failures are retried with exponential backoff;
//! missing branches and commits fail at once.

pub mod error;
pub mod extract;
pub mod git;
pub mod repo;
pub mod retry;

pub use error::RepoError;
pub use extract::{ProductState, RepoExtractor, RepoSource, RepoState};
pub use git::{GitExecutor, GitOutput, SystemGit};
pub use repo::GitRepo;
pub use retry::RetryPolicy;
