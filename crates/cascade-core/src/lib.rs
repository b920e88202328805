//! Cascade CI Core
//!
//! Core domain types, traits, and error handling for Cascade CI.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the repository manager and the CLI.

pub mod build;
pub mod change;
pub mod error;
pub mod flow;
pub mod ids;
pub mod manifest;
pub mod ports;

pub use error::{Error, Result};
pub use ids::*;
