//! Automatic failover for cluster members
//!
//! Each pass walks every member independently through an explicit lifecycle:
//! healthy, unhealthy since some instant, marked as a failure member, and
//! finally torn down. A member is marked only once it has been unhealthy past
//! the deadline, removing it keeps a strict majority of voters healthy, and
//! the number of concurrent failure members is below the cap. Anything short
//! of that is a deferral; the next pass re-evaluates from fresh status.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FailoverConfig;
use crate::core::cluster::events::{ClusterEvent, EventRecorder};
use crate::core::cluster::health::{self, MemberHealth};
use crate::core::cluster::quorum::{QuorumDecision, QuorumGuard};
use crate::core::cluster::reaper::{MemberReaper, ReapOutcome};
use crate::core::cluster::recovery::{self, RecoveryReport};
use crate::core::traits::{ClaimControl, MembershipClient, PodControl};
use crate::domain::{ClusterStatus, FailureMember, ManagedCluster};
use crate::error::{OperatorError, Result};

/// Lifecycle of a single member as seen from one status snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLifecycle {
    Healthy,
    Unhealthy { since: DateTime<Utc> },
    Failure { member_deleted: bool },
}

impl MemberLifecycle {
    /// Failure bookkeeping takes precedence over the reported health flag.
    pub fn of(status: &ClusterStatus, pod_name: &str, now: DateTime<Utc>) -> Self {
        if let Some(failure) = status.failure_members.get(pod_name) {
            return MemberLifecycle::Failure {
                member_deleted: failure.member_deleted,
            };
        }
        match status.members.get(pod_name) {
            Some(member) if !member.health => MemberLifecycle::Unhealthy {
                since: member.last_transition_time.unwrap_or(now),
            },
            _ => MemberLifecycle::Healthy,
        }
    }
}

/// Why an unhealthy member was left unmarked on this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    DeadlineNotReached { remaining: chrono::Duration },
    WouldBreakQuorum { healthy_remaining: usize, total_voters: usize },
    FailoverCapReached { cap: u32 },
    AlreadyMarked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverDecision {
    Mark,
    Defer(DeferReason),
}

/// Pure marking policy: deadline, quorum and cap threaded in explicitly
#[derive(Debug, Clone)]
pub struct FailureTracker {
    deadline: chrono::Duration,
    max_failover_count: u32,
}

impl FailureTracker {
    pub fn new(deadline: chrono::Duration, max_failover_count: u32) -> Self {
        Self {
            deadline,
            max_failover_count,
        }
    }

    pub fn evaluate(
        &self,
        member: &MemberHealth,
        status: &ClusterStatus,
        guard: &QuorumGuard,
        now: DateTime<Utc>,
    ) -> FailoverDecision {
        if status.failure_members.contains_key(&member.pod_name) {
            return FailoverDecision::Defer(DeferReason::AlreadyMarked);
        }

        let unhealthy_for = member.unhealthy_for(now);
        if unhealthy_for <= self.deadline {
            return FailoverDecision::Defer(DeferReason::DeadlineNotReached {
                remaining: self.deadline - unhealthy_for,
            });
        }

        if let QuorumDecision::WouldBreakQuorum {
            healthy_remaining,
            total_voters,
        } = guard.check_removal(&member.member_id)
        {
            return FailoverDecision::Defer(DeferReason::WouldBreakQuorum {
                healthy_remaining,
                total_voters,
            });
        }

        if status.failure_members.len() >= self.max_failover_count as usize {
            return FailoverDecision::Defer(DeferReason::FailoverCapReached {
                cap: self.max_failover_count,
            });
        }

        FailoverDecision::Mark
    }
}

/// What one failover pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailoverReport {
    pub unhealthy: Vec<String>,
    pub marked: Vec<String>,
    pub deferred: Vec<(String, DeferReason)>,
    pub reaped: Vec<String>,
}

/// Automatic Failover Manager
pub struct FailoverManager {
    config: FailoverConfig,
    pods: Arc<dyn PodControl>,
    reaper: MemberReaper,
    recorder: Arc<dyn EventRecorder>,
}

impl FailoverManager {
    /// Create a new failover manager
    pub fn new(
        config: FailoverConfig,
        pods: Arc<dyn PodControl>,
        claims: Arc<dyn ClaimControl>,
        membership: Arc<dyn MembershipClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let reaper = MemberReaper::new(pods.clone(), claims, membership, recorder.clone());
        Self {
            config,
            pods,
            reaper,
            recorder,
        }
    }

    pub fn reaper(&self) -> &MemberReaper {
        &self.reaper
    }

    /// Run one failover pass against `cluster`, mutating its status in place.
    pub async fn failover(&self, cluster: &mut ManagedCluster) -> Result<FailoverReport> {
        self.failover_at(cluster, Utc::now()).await
    }

    /// Same as [`FailoverManager::failover`] with an explicit clock.
    ///
    /// Status changes made before an error are kept in `cluster` so the
    /// caller can persist partial progress. Marking a member ends the pass
    /// with [`OperatorError::Requeue`]; its teardown starts on a later pass,
    /// once the mark has been written.
    pub async fn failover_at(
        &self,
        cluster: &mut ManagedCluster,
        now: DateTime<Utc>,
    ) -> Result<FailoverReport> {
        let mut report = FailoverReport::default();
        if !self.config.enabled {
            debug!(cluster = %cluster.cluster_ref(), "Failover disabled, skipping");
            return Ok(report);
        }

        let cluster_ref = cluster.cluster_ref();
        if !cluster.status.synced {
            return Err(OperatorError::StatusNotSynced {
                cluster: cluster_ref.to_string(),
            });
        }

        let tracker = FailureTracker::new(
            self.config.deadline()?,
            cluster.max_failover_count(self.config.max_failover_count),
        );
        let guard = QuorumGuard::from_status(&cluster.status);

        // Only members whose mark came in with the loaded status are torn
        // down. A mark made on this pass must be written first.
        let pending: Vec<String> = cluster
            .status
            .pending_failure_members()
            .map(|failure| failure.pod_name.clone())
            .collect();

        for member in health::observe(&cluster.status, now) {
            if member.healthy {
                continue;
            }

            report.unhealthy.push(member.pod_name.clone());
            self.recorder.record(
                &cluster_ref,
                ClusterEvent::Unhealthy {
                    pod_name: member.pod_name.clone(),
                    member_id: member.member_id.clone(),
                    timestamp: now,
                },
            );

            if member.clock_started_now {
                if let Some(record) = cluster.status.members.get_mut(&member.pod_name) {
                    record.last_transition_time = Some(now);
                }
            }

            match tracker.evaluate(&member, &cluster.status, &guard, now) {
                FailoverDecision::Mark => {
                    self.mark_failure_member(cluster, &member, now).await;
                    report.marked.push(member.pod_name.clone());
                }
                FailoverDecision::Defer(reason) => {
                    self.log_deferral(cluster, &member, &reason);
                    report.deferred.push((member.pod_name.clone(), reason));
                }
            }
        }

        for pod_name in pending {
            if let ReapOutcome::Reaped { .. } = self.reaper.reap(cluster, &pod_name).await? {
                report.reaped.push(pod_name);
            }
        }

        if !report.marked.is_empty() {
            return Err(OperatorError::Requeue(format!(
                "cluster {}: marked {} as failure member, teardown waits for the status write",
                cluster_ref,
                report.marked.join(", ")
            )));
        }

        Ok(report)
    }

    /// Clear failure bookkeeping once the episode is over.
    pub fn recover(&self, cluster: &mut ManagedCluster) -> RecoveryReport {
        recovery::recover(cluster)
    }

    async fn mark_failure_member(
        &self,
        cluster: &mut ManagedCluster,
        member: &MemberHealth,
        now: DateTime<Utc>,
    ) {
        let cluster_ref = cluster.cluster_ref();
        let claim_uid_set = self
            .attached_claim_uids(&cluster.namespace, &member.pod_name)
            .await;

        cluster.status.failure_members.insert(
            member.pod_name.clone(),
            FailureMember {
                pod_name: member.pod_name.clone(),
                member_id: member.member_id.clone(),
                claim_uid_set,
                member_deleted: false,
                created_at: now,
            },
        );

        self.recorder.record(
            &cluster_ref,
            ClusterEvent::MarkedForRemoval {
                namespace: cluster.namespace.clone(),
                pod_name: member.pod_name.clone(),
                member_id: member.member_id.clone(),
                timestamp: now,
            },
        );
        warn!(
            cluster = %cluster_ref,
            pod = %member.pod_name,
            member_id = %member.member_id,
            "Member unhealthy past deadline, marked as failure member"
        );
    }

    /// Uids of the claims mounted by the member's pod. Anything that cannot
    /// be located yields an empty set rather than failing the transition.
    async fn attached_claim_uids(&self, namespace: &str, pod_name: &str) -> BTreeSet<String> {
        let pod = match self.pods.get_pod(namespace, pod_name).await {
            Ok(Some(pod)) => pod,
            Ok(None) => {
                warn!(pod = %pod_name, "Pod not found while marking failure member");
                return BTreeSet::new();
            }
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "Failed to look up pod while marking failure member");
                return BTreeSet::new();
            }
        };

        match self.reaper.member_claims(namespace, pod_name, Some(&pod)).await {
            Ok(claims) => claims.into_iter().map(|claim| claim.uid).collect(),
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "Failed to look up claims while marking failure member");
                BTreeSet::new()
            }
        }
    }

    fn log_deferral(&self, cluster: &ManagedCluster, member: &MemberHealth, reason: &DeferReason) {
        let cluster_ref = cluster.cluster_ref();
        match reason {
            DeferReason::DeadlineNotReached { remaining } => debug!(
                cluster = %cluster_ref,
                pod = %member.pod_name,
                remaining_seconds = remaining.num_seconds(),
                "Member unhealthy but deadline not reached"
            ),
            DeferReason::WouldBreakQuorum {
                healthy_remaining,
                total_voters,
            } => warn!(
                cluster = %cluster_ref,
                pod = %member.pod_name,
                healthy_remaining = healthy_remaining,
                total_voters = total_voters,
                "Removing member would break quorum, deferring"
            ),
            DeferReason::FailoverCapReached { cap } => info!(
                cluster = %cluster_ref,
                pod = %member.pod_name,
                max_failover_count = cap,
                "Failure member cap reached, deferring"
            ),
            DeferReason::AlreadyMarked => debug!(
                cluster = %cluster_ref,
                pod = %member.pod_name,
                "Member already tracked as failure member"
            ),
        }
    }
}
