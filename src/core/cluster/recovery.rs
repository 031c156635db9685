//! Failure bookkeeping reset
//!
//! Failure members are transient bookkeeping for one failover episode. Once
//! the episode is over the whole mapping is cleared and the desired replica
//! count is trusted verbatim; the next pass re-detects anything still wrong.

use tracing::info;

use crate::domain::ManagedCluster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub cleared: usize,
    pub desired_replicas: i32,
}

/// Clear every failure member. `spec.replicas` is left untouched.
pub fn recover(cluster: &mut ManagedCluster) -> RecoveryReport {
    let cleared = cluster.status.failure_members.len();
    if cleared > 0 {
        cluster.status.failure_members.clear();
        info!(
            cluster = %cluster.cluster_ref(),
            cleared = cleared,
            desired_replicas = cluster.spec.replicas,
            "Cleared failure members"
        );
    }

    RecoveryReport {
        cleared,
        desired_replicas: cluster.spec.replicas,
    }
}

/// Replica count for the compute group: the desired size plus one
/// replacement slot per torn-down failure member.
pub fn desired_group_replicas(cluster: &ManagedCluster) -> i32 {
    cluster.spec.replicas + cluster.status.deleted_failure_member_count() as i32
}
