//! Domain model for managed clusters and the workload objects backing them

pub mod entities;

pub use entities::*;
