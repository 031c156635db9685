//! Core decision logic and the contracts it runs against

// Member lifecycle decisions and the pass driver
pub mod cluster;

// Structured logging setup
pub mod logging;

// Collaborator traits
pub mod traits;

pub use cluster::{ClusterReconciler, Collaborators};
