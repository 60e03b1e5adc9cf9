//! Common test infrastructure
//!
//! Every integration test builds a [`TestEnv`]: a fresh on-disk database in a
//! temporary directory with all stores and services wired the way the daemon
//! wires them.

mod fixtures;

pub use fixtures::{monday, RecordingSender, TestEnv};
