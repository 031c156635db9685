//! Per-cluster pass driver
//!
//! Loads a cluster record, runs either recovery or failover against a
//! private copy, and writes the status back when it changed. The write
//! happens even when the pass failed part-way so progress such as a newly
//! marked failure member survives into the next pass. A pass that marks a
//! member ends in a requeue, so teardown only ever starts from a mark that
//! is already stored.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::OperatorConfig;
use crate::core::cluster::events::EventRecorder;
use crate::core::cluster::failover::{FailoverManager, FailoverReport};
use crate::core::cluster::recovery::{self, RecoveryReport};
use crate::core::cluster::upgrade::{UpgradeOutcome, UpgradeStepper};
use crate::core::traits::{ClaimControl, ClusterStore, GroupControl, MembershipClient, PodControl};
use crate::domain::{ComputeGroup, ManagedCluster};
use crate::error::{retry_on_conflict, OperatorError, Result, RetryPolicy};

/// Everything a reconciler talks to
#[derive(Clone)]
pub struct Collaborators {
    pub clusters: Arc<dyn ClusterStore>,
    pub pods: Arc<dyn PodControl>,
    pub claims: Arc<dyn ClaimControl>,
    pub groups: Arc<dyn GroupControl>,
    pub membership: Arc<dyn MembershipClient>,
    pub recorder: Arc<dyn EventRecorder>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassAction {
    Failover(FailoverReport),
    Recovery(RecoveryReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub action: PassAction,
    pub status_written: bool,
    /// New replica count written to the compute group, if it changed
    pub group_replicas: Option<i32>,
}

pub struct ClusterReconciler {
    clusters: Arc<dyn ClusterStore>,
    groups: Arc<dyn GroupControl>,
    failover: FailoverManager,
    upgrader: UpgradeStepper,
    status_retry: RetryPolicy,
}

impl ClusterReconciler {
    pub fn new(config: &OperatorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let upgrader = UpgradeStepper::new(
            &config.upgrade,
            collaborators.pods.clone(),
            collaborators.membership.clone(),
            collaborators.recorder.clone(),
        )?;
        let failover = FailoverManager::new(
            config.failover.clone(),
            collaborators.pods,
            collaborators.claims,
            collaborators.membership,
            collaborators.recorder,
        );
        Ok(Self {
            clusters: collaborators.clusters,
            groups: collaborators.groups,
            failover,
            upgrader,
            status_retry: config.status_retry.clone(),
        })
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileReport> {
        self.reconcile_at(namespace, name, Utc::now()).await
    }

    /// One failover-or-recovery pass with an explicit clock.
    #[instrument(skip(self, now))]
    pub async fn reconcile_at(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let original = self.clusters.get_cluster(namespace, name).await?;
        let mut cluster = original.clone();

        let pass = if cluster.status.all_members_healthy()
            && !cluster.status.failure_members.is_empty()
        {
            Ok(PassAction::Recovery(self.failover.recover(&mut cluster)))
        } else {
            self.failover
                .failover_at(&mut cluster, now)
                .await
                .map(PassAction::Failover)
        };

        let written = self.persist_status(&original, &cluster).await;
        let (action, written) = settle(&cluster, pass, written)?;
        let status_written = written.is_some();

        let group_replicas = self.sync_group_replicas(&cluster).await?;

        Ok(ReconcileReport {
            action,
            status_written,
            group_replicas,
        })
    }

    /// Step a rolling upgrade of the cluster's compute group toward
    /// `desired`, writing the group and the cluster phase back as needed.
    #[instrument(skip(self, desired), fields(group = %desired.name))]
    pub async fn reconcile_upgrade(
        &self,
        namespace: &str,
        name: &str,
        mut desired: ComputeGroup,
    ) -> Result<UpgradeOutcome> {
        let original = self.clusters.get_cluster(namespace, name).await?;
        let mut cluster = original.clone();
        let live = self
            .groups
            .get_group(namespace, &cluster.group_name())
            .await?
            .ok_or_else(|| {
                OperatorError::NotFound(format!(
                    "compute group {}/{}",
                    namespace,
                    cluster.group_name()
                ))
            })?;

        let outcome = self.upgrader.upgrade(&mut cluster, &live, &mut desired).await;
        let written = self.persist_status(&original, &cluster).await;
        let (outcome, _) = settle(&cluster, outcome, written)?;

        if desired != live {
            self.groups.update_group(&desired).await?;
            debug!(cluster = %cluster.cluster_ref(), outcome = ?outcome, "Compute group updated");
        }
        Ok(outcome)
    }

    /// Write `updated`'s status when it differs from `original`. On a
    /// conflict the record is re-read and only operator-owned fields are
    /// carried over.
    async fn persist_status(
        &self,
        original: &ManagedCluster,
        updated: &ManagedCluster,
    ) -> Result<Option<ManagedCluster>> {
        if original.status == updated.status {
            return Ok(None);
        }

        let mut first_attempt = true;
        let written = retry_on_conflict(&self.status_retry, || {
            let reread = !std::mem::replace(&mut first_attempt, false);
            async move {
                let candidate = if reread {
                    let mut fresh = self
                        .clusters
                        .get_cluster(&updated.namespace, &updated.name)
                        .await?;
                    apply_operator_fields(&mut fresh, updated);
                    fresh
                } else {
                    updated.clone()
                };
                self.clusters.update_status(&candidate).await
            }
        })
        .await?;

        debug!(
            cluster = %written.cluster_ref(),
            resource_version = written.resource_version,
            "Cluster status written"
        );
        Ok(Some(written))
    }

    async fn sync_group_replicas(&self, cluster: &ManagedCluster) -> Result<Option<i32>> {
        let Some(mut group) = self
            .groups
            .get_group(&cluster.namespace, &cluster.group_name())
            .await?
        else {
            return Ok(None);
        };

        let replicas = recovery::desired_group_replicas(cluster);
        if group.replicas == replicas {
            return Ok(None);
        }
        info!(
            cluster = %cluster.cluster_ref(),
            group = %group.name,
            from = group.replicas,
            to = replicas,
            "Adjusting compute group replicas for failure members"
        );
        group.replicas = replicas;
        self.groups.update_group(&group).await?;
        Ok(Some(replicas))
    }
}

/// Combine a pass result with its status write. A pass error wins over a
/// write error, which is then only logged, except for a requeue: that asks
/// for the write to land first, so the write error is surfaced instead.
fn settle<T>(
    cluster: &ManagedCluster,
    pass: Result<T>,
    written: Result<Option<ManagedCluster>>,
) -> Result<(T, Option<ManagedCluster>)> {
    match (pass, written) {
        (Ok(value), Ok(written)) => Ok((value, written)),
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => Err(e),
        (Err(pass_error), Err(write_error)) => {
            error!(
                cluster = %cluster.cluster_ref(),
                error = %write_error,
                "Failed to persist partial progress"
            );
            if pass_error.is_requeue() {
                Err(write_error)
            } else {
                Err(pass_error)
            }
        }
    }
}

/// Copy the fields this operator owns from `updated` onto a freshly read
/// record, leaving whatever the status-sync collaborator wrote in place.
fn apply_operator_fields(fresh: &mut ManagedCluster, updated: &ManagedCluster) {
    fresh.status.failure_members = updated.status.failure_members.clone();
    fresh.status.phase = updated.status.phase;

    for (pod_name, member) in &updated.status.members {
        if let Some(current) = fresh.status.members.get_mut(pod_name) {
            if current.last_transition_time.is_none() && current.health == member.health {
                current.last_transition_time = member.last_transition_time;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClusterPhase;
    use crate::testing::test_data_factory::{failure_member, three_member_cluster};

    #[test]
    fn test_apply_operator_fields_keeps_sync_owned_state() {
        let now = Utc::now();
        let mut updated = three_member_cluster();
        updated.status.phase = ClusterPhase::Upgrading;
        updated.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "1", &[]),
        );
        let clock = updated.status.members.get_mut("basic-store-2").unwrap();
        clock.health = false;
        clock.last_transition_time = Some(now);

        let mut fresh = three_member_cluster();
        fresh.resource_version = 7;
        fresh.status.members.get_mut("basic-store-2").unwrap().health = false;
        fresh.status.members.get_mut("basic-store-0").unwrap().health = false;

        apply_operator_fields(&mut fresh, &updated);

        assert_eq!(fresh.resource_version, 7);
        assert_eq!(fresh.status.phase, ClusterPhase::Upgrading);
        assert!(fresh.status.failure_members.contains_key("basic-store-1"));
        assert_eq!(
            fresh.status.members["basic-store-2"].last_transition_time,
            Some(now)
        );
        assert!(!fresh.status.members["basic-store-0"].health);
    }

    #[test]
    fn test_settle_surfaces_write_error_behind_requeue() {
        let cluster = three_member_cluster();

        let err = settle::<()>(
            &cluster,
            Err(OperatorError::Requeue("marked basic-store-1".into())),
            Err(OperatorError::Conflict("stale".into())),
        )
        .unwrap_err();
        assert!(err.is_conflict());

        let err = settle::<()>(
            &cluster,
            Err(OperatorError::ExternalServiceError("membership api down".into())),
            Err(OperatorError::Conflict("stale".into())),
        )
        .unwrap_err();
        assert!(err.to_string().contains("membership api down"));

        let err = settle::<()>(
            &cluster,
            Err(OperatorError::Requeue("marked basic-store-1".into())),
            Ok(None),
        )
        .unwrap_err();
        assert!(err.is_requeue());
    }
}
