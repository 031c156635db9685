//! Cluster member lifecycle
//!
//! Health observation, quorum-guarded failure marking, ordered member
//! teardown, recovery of failure bookkeeping, and partition-stepped rolling
//! upgrades, plus the pass driver that runs them against a cluster record.

pub mod events;
pub mod failover;
pub mod health;
pub mod quorum;
pub mod reaper;
pub mod reconciler;
pub mod recovery;
pub mod upgrade;
pub mod version;

// Re-export commonly used types
pub use events::{ClusterEvent, EventRecorder, InMemoryEventRecorder, TracingEventRecorder};
pub use failover::{DeferReason, FailoverDecision, FailoverManager, FailoverReport, FailureTracker};
pub use quorum::{QuorumDecision, QuorumGuard};
pub use reaper::{MemberReaper, ReapOutcome};
pub use reconciler::{ClusterReconciler, Collaborators, PassAction, ReconcileReport};
pub use recovery::RecoveryReport;
pub use upgrade::{UpgradeDeferral, UpgradeOutcome, UpgradeStepper};
