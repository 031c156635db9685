//! Collaborator contracts
//!
//! The decision core never talks to an object store directly. Every read and
//! mutation goes through one of these traits so the same logic runs against
//! live cluster clients and the in-memory doubles in [`crate::testing`].
//! Reads are point-in-time snapshots and may be stale.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{ClusterRef, ComputeGroup, ManagedCluster, Pod, StorageClaim};
use crate::error::Result;

/// Status store for managed cluster records
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ManagedCluster>;

    /// Write the status back. Fails with `Conflict` when `resource_version`
    /// no longer matches the stored record.
    async fn update_status(&self, cluster: &ManagedCluster) -> Result<ManagedCluster>;
}

/// Pod directory
#[async_trait]
pub trait PodControl: Send + Sync {
    /// Cached lookup; `None` when the pod does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Idempotent against not-found.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Storage-claim directory
#[async_trait]
pub trait ClaimControl: Send + Sync {
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<StorageClaim>>;

    /// Claims labelled as belonging to `pod_name`, used once the pod is gone.
    async fn list_claims_for_pod(&self, namespace: &str, pod_name: &str)
        -> Result<Vec<StorageClaim>>;

    /// Idempotent against not-found.
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Compute group directory
#[async_trait]
pub trait GroupControl: Send + Sync {
    async fn get_group(&self, namespace: &str, name: &str) -> Result<Option<ComputeGroup>>;

    async fn update_group(&self, group: &ComputeGroup) -> Result<ComputeGroup>;
}

/// Address of a single member's status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAddress {
    pub namespace: String,
    pub cluster: String,
    pub pod_name: String,
    pub peer_service: String,
    pub tls_enabled: bool,
}

impl MemberAddress {
    pub fn for_pod(cluster: &ManagedCluster, pod_name: &str) -> Self {
        Self {
            namespace: cluster.namespace.clone(),
            cluster: cluster.name.clone(),
            pod_name: pod_name.to_string(),
            peer_service: cluster.peer_service_name(),
            tls_enabled: cluster.spec.tls_enabled,
        }
    }

    /// `{pod}.{peer-service}.{namespace}.svc`
    pub fn host(&self) -> String {
        format!("{}.{}.{}.svc", self.pod_name, self.peer_service, self.namespace)
    }
}

/// Live status reported by a member's own status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreLiveStatus {
    Running,
    Stopping,
    Idle,
    Other(String),
}

impl StoreLiveStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Running" => StoreLiveStatus::Running,
            "Stopping" => StoreLiveStatus::Stopping,
            "Idle" => StoreLiveStatus::Idle,
            other => StoreLiveStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StoreLiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLiveStatus::Running => write!(f, "Running"),
            StoreLiveStatus::Stopping => write!(f, "Stopping"),
            StoreLiveStatus::Idle => write!(f, "Idle"),
            StoreLiveStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// The managed database's own membership API
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Remove a member by numeric id. Idempotent against an absent id.
    async fn delete_member(&self, cluster: &ClusterRef, member_id: u64) -> Result<()>;

    async fn get_store_status(&self, address: &MemberAddress) -> Result<StoreLiveStatus>;
}
