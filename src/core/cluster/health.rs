//! Per-member health evaluation from the observed cluster status

use chrono::{DateTime, Utc};

use crate::domain::ClusterStatus;

/// Health of one member at the time of observation
#[derive(Debug, Clone, PartialEq)]
pub struct MemberHealth {
    pub pod_name: String,
    pub member_id: String,
    pub healthy: bool,
    /// When the member became unhealthy. Meaningless for healthy members.
    pub unhealthy_since: DateTime<Utc>,
    /// The status carried no transition time, so `unhealthy_since` is `now`.
    pub clock_started_now: bool,
}

impl MemberHealth {
    /// How long the member has been unhealthy as of `now`.
    pub fn unhealthy_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.unhealthy_since
    }
}

/// Evaluate every member in pod-name order. Pure; a missing transition time
/// starts the deadline clock at `now`.
pub fn observe(status: &ClusterStatus, now: DateTime<Utc>) -> Vec<MemberHealth> {
    status
        .members
        .iter()
        .map(|(pod_name, member)| MemberHealth {
            pod_name: pod_name.clone(),
            member_id: member.id.clone(),
            healthy: member.health,
            unhealthy_since: member.last_transition_time.unwrap_or(now),
            clock_started_now: member.last_transition_time.is_none(),
        })
        .collect()
}
