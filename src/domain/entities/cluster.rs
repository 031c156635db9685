//! Cluster domain entities and types
//!
//! A [`ManagedCluster`] is the per-cluster record the operator reconciles.
//! Its [`ClusterStatus`] is shared with an external status-sync collaborator
//! that overwrites members, peer members and stores on every observation
//! cycle; the operator owns the failure-member bookkeeping and the phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Namespaced identity of a managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    pub namespace: String,
    pub name: String,
}

impl ClusterRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase of a member group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusterPhase {
    #[default]
    Normal,
    Upgrading,
    Scaling,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterPhase::Normal => write!(f, "Normal"),
            ClusterPhase::Upgrading => write!(f, "Upgrading"),
            ClusterPhase::Scaling => write!(f, "Scaling"),
        }
    }
}

/// One voting participant as reported by the cluster itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Pod name backing the member
    pub name: String,
    /// Numeric member id as reported by the cluster, kept as text
    pub id: String,
    pub health: bool,
    /// Last time `health` flipped; `None` when never observed
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(name: impl Into<String>, id: impl Into<String>, health: bool) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            health,
            last_transition_time: None,
        }
    }
}

/// Secondary view of a voter (e.g. gossip peers), used only for quorum counting
pub type PeerMember = Member;

/// Bookkeeping for a member being removed after prolonged unhealthiness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMember {
    pub pod_name: String,
    /// Free text copied from the member record; validated before use
    pub member_id: String,
    /// Storage-claim uids attached to the pod when the member was marked
    pub claim_uid_set: BTreeSet<String>,
    /// Flips false -> true once teardown completed
    pub member_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Operational state of a store as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreState {
    Up,
    Down,
    Offline,
    Tombstone,
    Disconnected,
}

/// Store record keyed by store id, linked to its pod by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    pub pod_name: String,
    pub state: StoreState,
}

/// Observed status of a cluster, read-modify-written every pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub synced: bool,
    pub phase: ClusterPhase,
    /// Phase of the control-plane component driving its own rollout
    pub control_plane_phase: ClusterPhase,
    pub members: BTreeMap<String, Member>,
    pub peer_members: BTreeMap<String, PeerMember>,
    pub failure_members: BTreeMap<String, FailureMember>,
    pub stores: BTreeMap<String, StoreRecord>,
}

impl ClusterStatus {
    /// Store whose pod name matches, if the control plane reports one.
    pub fn store_for_pod(&self, pod_name: &str) -> Option<&StoreRecord> {
        self.stores.values().find(|store| store.pod_name == pod_name)
    }

    /// Failure members whose teardown has not finished yet.
    pub fn pending_failure_members(&self) -> impl Iterator<Item = &FailureMember> {
        self.failure_members
            .values()
            .filter(|member| !member.member_deleted)
    }

    pub fn deleted_failure_member_count(&self) -> usize {
        self.failure_members
            .values()
            .filter(|member| member.member_deleted)
            .count()
    }

    pub fn all_members_healthy(&self) -> bool {
        self.members.values().all(|member| member.health)
    }
}

/// Desired state of a managed cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub replicas: i32,
    pub image: String,
    /// Overrides the operator-wide cap on concurrent failure members
    pub max_failover_count: Option<u32>,
    #[serde(default)]
    pub tls_enabled: bool,
}

/// The per-cluster record the operator reconciles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedCluster {
    pub namespace: String,
    pub name: String,
    /// Member group component name, used to derive object names
    pub component: String,
    /// Optimistic-concurrency token, bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl ManagedCluster {
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef::new(&self.namespace, &self.name)
    }

    /// Name of the compute group running the members.
    pub fn group_name(&self) -> String {
        format!("{}-{}", self.name, self.component)
    }

    /// Pod name for a given ordinal of the compute group.
    pub fn member_pod_name(&self, ordinal: i32) -> String {
        format!("{}-{}", self.group_name(), ordinal)
    }

    /// Headless service the member pods resolve under.
    pub fn peer_service_name(&self) -> String {
        format!("{}-peer", self.group_name())
    }

    pub fn max_failover_count(&self, default: u32) -> u32 {
        self.spec.max_failover_count.unwrap_or(default)
    }
}
