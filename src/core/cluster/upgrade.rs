//! Quorum-aware rolling upgrade stepper
//!
//! The compute group's native rolling mechanism replaces pods whose ordinal
//! is at or above the partition. The stepper lowers the partition one
//! ordinal at a time, from the highest ordinal down, and only after every
//! already-upgraded member above it is ready, up, and (for newer images)
//! reports itself running. Ordinal 0 usually carries the seed role, so it
//! goes last.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::core::cluster::events::{ClusterEvent, EventRecorder};
use crate::core::cluster::version::StatusCheckGate;
use crate::core::traits::{MemberAddress, MembershipClient, PodControl, StoreLiveStatus};
use crate::domain::{ClusterPhase, ComputeGroup, ManagedCluster, StoreState};
use crate::error::{OperatorError, Result};

/// Why the stepper yielded without touching the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeDeferral {
    ControlPlaneUpgrading,
    Scaling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Another driver is busy; the live template was kept
    Deferred(UpgradeDeferral),
    /// The desired template has not been rolled into the live group yet
    TemplatePending,
    /// Current and update revisions already match
    NothingToDo,
    /// The update strategy was switched off partition control by hand
    ManualBypass,
    /// Partition lowered to this ordinal; pods at or above it may roll
    Stepped { partition: i32 },
    /// Every ordinal runs the update revision; the partition is back at 0
    Complete,
    /// Every present ordinal runs the update revision but a member without a
    /// store record still holds the partition at this ordinal
    Held { partition: i32 },
}

pub struct UpgradeStepper {
    pods: Arc<dyn PodControl>,
    membership: Arc<dyn MembershipClient>,
    recorder: Arc<dyn EventRecorder>,
    gate: StatusCheckGate,
}

impl UpgradeStepper {
    pub fn new(
        config: &UpgradeConfig,
        pods: Arc<dyn PodControl>,
        membership: Arc<dyn MembershipClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<Self> {
        Ok(Self {
            pods,
            membership,
            recorder,
            gate: StatusCheckGate::from_config(config)?,
        })
    }

    /// Decide how far `desired` may roll given the `live` group.
    ///
    /// Only `desired` and the cluster phase are modified. A retryable error
    /// leaves the partition of `desired` untouched.
    pub async fn upgrade(
        &self,
        cluster: &mut ManagedCluster,
        live: &ComputeGroup,
        desired: &mut ComputeGroup,
    ) -> Result<UpgradeOutcome> {
        let cluster_ref = cluster.cluster_ref();

        let deferral = if cluster.status.control_plane_phase == ClusterPhase::Upgrading {
            Some(UpgradeDeferral::ControlPlaneUpgrading)
        } else if cluster.status.phase == ClusterPhase::Scaling {
            Some(UpgradeDeferral::Scaling)
        } else {
            None
        };
        if let Some(deferral) = deferral {
            info!(
                cluster = %cluster_ref,
                phase = %cluster.status.phase,
                control_plane_phase = %cluster.status.control_plane_phase,
                "Cluster busy, can not upgrade members"
            );
            desired.template = live.template.clone();
            return Ok(UpgradeOutcome::Deferred(deferral));
        }

        if !cluster.status.synced {
            return Err(OperatorError::StatusNotSynced {
                cluster: cluster_ref.to_string(),
            });
        }

        if desired.template != live.template {
            cluster.status.phase = ClusterPhase::Upgrading;
            debug!(cluster = %cluster_ref, "Template change not rolled into live group yet");
            return Ok(UpgradeOutcome::TemplatePending);
        }

        let target_revision = live.status.update_revision.as_str();
        if target_revision == live.status.current_revision {
            if cluster.status.phase == ClusterPhase::Upgrading {
                cluster.status.phase = ClusterPhase::Normal;
            }
            return Ok(UpgradeOutcome::NothingToDo);
        }
        cluster.status.phase = ClusterPhase::Upgrading;

        let Some(mut partition) = live.partition().filter(|_| !live.update_strategy.bypasses_partition())
        else {
            desired.update_strategy = live.update_strategy.clone();
            self.recorder.record(
                &cluster_ref,
                ClusterEvent::ManualBypassDetected {
                    namespace: live.namespace.clone(),
                    group_name: live.name.clone(),
                    timestamp: Utc::now(),
                },
            );
            warn!(
                cluster = %cluster_ref,
                group = %live.name,
                "Update strategy has been modified manually, leaving rollout to the native controller"
            );
            return Ok(UpgradeOutcome::ManualBypass);
        };

        let mut blocked_on_missing = false;
        for ordinal in live.pod_ordinals().into_iter().rev() {
            let pod_name = cluster.member_pod_name(ordinal);

            let Some(store) = cluster.status.store_for_pod(&pod_name) else {
                debug!(cluster = %cluster_ref, pod = %pod_name, "No store record yet, holding partition here");
                partition = ordinal;
                blocked_on_missing = true;
                continue;
            };

            let pod = self.pods.get_pod(&cluster.namespace, &pod_name).await?.ok_or_else(|| {
                OperatorError::Requeue(format!(
                    "cluster {}: pod {} not found in cache",
                    cluster_ref, pod_name
                ))
            })?;
            let revision = pod.revision().ok_or_else(|| {
                OperatorError::Requeue(format!(
                    "cluster {}: pod {} has no revision label",
                    cluster_ref, pod_name
                ))
            })?;

            if revision != target_revision {
                desired.set_partition(ordinal);
                info!(
                    cluster = %cluster_ref,
                    pod = %pod_name,
                    partition = ordinal,
                    "Upgrade partition stepped"
                );
                return Ok(UpgradeOutcome::Stepped { partition: ordinal });
            }

            if !pod.ready {
                return Err(OperatorError::Requeue(format!(
                    "cluster {}: upgraded pod {} is not ready",
                    cluster_ref, pod_name
                )));
            }
            if store.state != StoreState::Up {
                return Err(OperatorError::Requeue(format!(
                    "cluster {}: upgraded pod {} store state is {:?}, not Up",
                    cluster_ref, pod_name, store.state
                )));
            }
            if self.gate.needs_status_check_for_image(&cluster.spec.image) {
                let address = MemberAddress::for_pod(cluster, &pod_name);
                let status = self.membership.get_store_status(&address).await.map_err(|e| {
                    OperatorError::Requeue(format!(
                        "cluster {}: upgraded pod {} store status check failed: {}",
                        cluster_ref, pod_name, e
                    ))
                })?;
                if status != StoreLiveStatus::Running {
                    return Err(OperatorError::Requeue(format!(
                        "cluster {}: upgraded pod {} store status is {} instead of Running",
                        cluster_ref, pod_name, status
                    )));
                }
            }
        }

        if blocked_on_missing {
            desired.set_partition(partition);
            info!(
                cluster = %cluster_ref,
                partition = partition,
                "Members on update revision, partition held for a store not registered yet"
            );
            return Ok(UpgradeOutcome::Held { partition });
        }
        desired.set_partition(0);
        info!(cluster = %cluster_ref, "All members on update revision");
        Ok(UpgradeOutcome::Complete)
    }
}
