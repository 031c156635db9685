//! Workload objects backing cluster members: pods, storage claims and the
//! ordinal compute group that owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label carrying the compute-group revision a pod was created from
pub const REVISION_LABEL: &str = "controller-revision-hash";

/// Label linking a storage claim to the pod that mounts it
pub const POD_NAME_LABEL: &str = "quorum-ops/pod-name";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodVolume {
    pub name: String,
    /// Storage claim backing the volume, if any
    pub claim_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<PodVolume>,
    pub ready: bool,
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn revision(&self) -> Option<&str> {
        self.labels.get(REVISION_LABEL).map(String::as_str)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Names of the storage claims mounted by this pod, in volume order.
    pub fn claim_names(&self) -> impl Iterator<Item = &str> {
        self.volumes
            .iter()
            .filter_map(|volume| volume.claim_name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageClaim {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl StorageClaim {
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn owner_pod(&self) -> Option<&str> {
        self.labels.get(POD_NAME_LABEL).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategyType {
    RollingUpdate,
    OnDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdate {
    /// Pods with an ordinal at or above the partition may be replaced
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStrategy {
    pub strategy_type: UpdateStrategyType,
    pub rolling_update: Option<RollingUpdate>,
}

impl UpdateStrategy {
    pub fn rolling(partition: i32) -> Self {
        Self {
            strategy_type: UpdateStrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdate { partition }),
        }
    }

    /// True when someone switched the group away from partition control.
    pub fn bypasses_partition(&self) -> bool {
        self.strategy_type == UpdateStrategyType::OnDelete || self.rolling_update.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub image: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub current_revision: String,
    pub update_revision: String,
}

/// Ordinal compute group (stateful-set analogue) owning the member pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeGroup {
    pub namespace: String,
    pub name: String,
    pub replicas: i32,
    /// Ordinals skipped when assigning pods
    #[serde(default)]
    pub delete_slots: BTreeSet<i32>,
    pub template: PodTemplate,
    pub update_strategy: UpdateStrategy,
    #[serde(default)]
    pub status: GroupStatus,
    #[serde(default)]
    pub resource_version: u64,
}

impl ComputeGroup {
    /// Ordinals of the pods this group runs, ascending.
    ///
    /// The first `replicas` non-negative integers not listed in
    /// `delete_slots`.
    pub fn pod_ordinals(&self) -> Vec<i32> {
        let wanted = self.replicas.max(0) as usize;
        (0..)
            .filter(|ordinal| !self.delete_slots.contains(ordinal))
            .take(wanted)
            .collect()
    }

    pub fn partition(&self) -> Option<i32> {
        self.update_strategy
            .rolling_update
            .map(|rolling| rolling.partition)
    }

    pub fn set_partition(&mut self, partition: i32) {
        self.update_strategy = UpdateStrategy::rolling(partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(replicas: i32, delete_slots: &[i32]) -> ComputeGroup {
        ComputeGroup {
            namespace: "default".into(),
            name: "basic-store".into(),
            replicas,
            delete_slots: delete_slots.iter().copied().collect(),
            template: PodTemplate {
                image: "store:v5.1.2".into(),
                annotations: BTreeMap::new(),
            },
            update_strategy: UpdateStrategy::rolling(0),
            status: GroupStatus::default(),
            resource_version: 0,
        }
    }

    #[test]
    fn test_pod_ordinals_skip_delete_slots() {
        assert_eq!(group(3, &[]).pod_ordinals(), vec![0, 1, 2]);
        assert_eq!(group(3, &[1]).pod_ordinals(), vec![0, 2, 3]);
        assert!(group(0, &[]).pod_ordinals().is_empty());
    }

    #[test]
    fn test_bypass_detection() {
        assert!(!UpdateStrategy::rolling(2).bypasses_partition());
        assert!(UpdateStrategy {
            strategy_type: UpdateStrategyType::OnDelete,
            rolling_update: Some(RollingUpdate { partition: 0 }),
        }
        .bypasses_partition());
        assert!(UpdateStrategy {
            strategy_type: UpdateStrategyType::RollingUpdate,
            rolling_update: None,
        }
        .bypasses_partition());
    }
}
