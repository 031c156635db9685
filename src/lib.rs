//! Quorum-aware lifecycle operations for replicated database clusters
//!
//! This library holds the decision core of a cluster operator: it watches
//! member health reported by the cluster, replaces members that stay
//! unhealthy without ever breaking voting quorum, and steps rolling upgrades
//! one ordinal at a time.

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod testing;

// Re-export commonly used types
pub use error::{OperatorError, Result};
