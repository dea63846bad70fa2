//! Test infrastructure for phenix user apps
//!
//! Provides:
//! - Experiment and `vm info` fixtures
//! - A mock cluster that records dispatched commands
//! - Verification of what a command log leaves behind on the cluster

pub mod fixtures;
mod mock;
mod verification;

pub use fixtures::*;
pub use mock::{MockCluster, SentCommand};
pub use verification::*;
