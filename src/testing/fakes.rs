use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::traits::{
    ClaimControl, ClusterStore, GroupControl, MemberAddress, MembershipClient, PodControl,
    StoreLiveStatus,
};
use crate::domain::{ClusterRef, ComputeGroup, ManagedCluster, Pod, StorageClaim};
use crate::error::{OperatorError, Result};

/// Counts requests to one operation and fails them once armed.
///
/// With `after == 0` every request fails; with `after == n` the first `n`
/// requests succeed and the rest fail.
#[derive(Debug, Default, Clone)]
pub struct FailureInjector {
    error: Option<String>,
    after: usize,
    requests: usize,
}

impl FailureInjector {
    pub fn arm(&mut self, message: &str, after: usize) {
        self.error = Some(message.to_string());
        self.after = after;
        self.requests = 0;
    }

    pub fn disarm(&mut self) {
        self.error = None;
        self.requests = 0;
    }

    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn check(&mut self) -> Result<()> {
        self.requests += 1;
        match &self.error {
            Some(message) if self.requests > self.after => {
                Err(OperatorError::ExternalServiceError(message.clone()))
            }
            _ => Ok(()),
        }
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Pod directory backed by a map
#[derive(Default)]
pub struct FakePodControl {
    pods: Arc<RwLock<BTreeMap<String, Pod>>>,
    deleted: Arc<RwLock<Vec<String>>>,
    get_failures: Arc<RwLock<FailureInjector>>,
    delete_failures: Arc<RwLock<FailureInjector>>,
}

impl FakePodControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pod: Pod) {
        self.pods
            .write()
            .await
            .insert(key(&pod.namespace, &pod.name), pod);
    }

    /// Names of the pods deleted so far, in call order.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }

    pub async fn set_get_error(&self, message: &str, after: usize) {
        self.get_failures.write().await.arm(message, after);
    }

    pub async fn set_delete_error(&self, message: &str, after: usize) {
        self.delete_failures.write().await.arm(message, after);
    }

    pub async fn clear_errors(&self) {
        self.get_failures.write().await.disarm();
        self.delete_failures.write().await.disarm();
    }
}

#[async_trait]
impl PodControl for FakePodControl {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get_failures.write().await.check()?;
        Ok(self.pods.read().await.get(&key(namespace, name)).cloned())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_failures.write().await.check()?;
        self.pods.write().await.remove(&key(namespace, name));
        self.deleted.write().await.push(name.to_string());
        Ok(())
    }
}

/// Storage-claim directory backed by a map
#[derive(Default)]
pub struct FakeClaimControl {
    claims: Arc<RwLock<BTreeMap<String, StorageClaim>>>,
    deleted: Arc<RwLock<Vec<String>>>,
    get_failures: Arc<RwLock<FailureInjector>>,
    list_failures: Arc<RwLock<FailureInjector>>,
    delete_failures: Arc<RwLock<FailureInjector>>,
}

impl FakeClaimControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, claim: StorageClaim) {
        self.claims
            .write()
            .await
            .insert(key(&claim.namespace, &claim.name), claim);
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }

    pub async fn set_get_error(&self, message: &str, after: usize) {
        self.get_failures.write().await.arm(message, after);
    }

    pub async fn set_list_error(&self, message: &str, after: usize) {
        self.list_failures.write().await.arm(message, after);
    }

    pub async fn set_delete_error(&self, message: &str, after: usize) {
        self.delete_failures.write().await.arm(message, after);
    }

    /// Delete requests seen since the delete error was last armed or cleared,
    /// failed ones included.
    pub async fn delete_requests(&self) -> usize {
        self.delete_failures.read().await.requests()
    }

    pub async fn clear_errors(&self) {
        self.get_failures.write().await.disarm();
        self.list_failures.write().await.disarm();
        self.delete_failures.write().await.disarm();
    }
}

#[async_trait]
impl ClaimControl for FakeClaimControl {
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<StorageClaim>> {
        self.get_failures.write().await.check()?;
        Ok(self.claims.read().await.get(&key(namespace, name)).cloned())
    }

    async fn list_claims_for_pod(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<StorageClaim>> {
        self.list_failures.write().await.check()?;
        Ok(self
            .claims
            .read()
            .await
            .values()
            .filter(|claim| claim.namespace == namespace && claim.owner_pod() == Some(pod_name))
            .cloned()
            .collect())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_failures.write().await.check()?;
        self.claims.write().await.remove(&key(namespace, name));
        self.deleted.write().await.push(name.to_string());
        Ok(())
    }
}

/// Membership API double recording deregistrations and serving canned
/// live statuses per pod
#[derive(Default)]
pub struct FakeMembershipClient {
    deleted_members: Arc<RwLock<Vec<u64>>>,
    store_statuses: Arc<RwLock<HashMap<String, StoreLiveStatus>>>,
    status_checks: Arc<RwLock<usize>>,
    delete_failures: Arc<RwLock<FailureInjector>>,
}

impl FakeMembershipClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deleted_members(&self) -> Vec<u64> {
        self.deleted_members.read().await.clone()
    }

    pub async fn set_delete_error(&self, message: &str, after: usize) {
        self.delete_failures.write().await.arm(message, after);
    }

    pub async fn clear_errors(&self) {
        self.delete_failures.write().await.disarm();
    }

    pub async fn set_store_status(&self, pod_name: &str, status: StoreLiveStatus) {
        self.store_statuses
            .write()
            .await
            .insert(pod_name.to_string(), status);
    }

    pub async fn status_checks(&self) -> usize {
        *self.status_checks.read().await
    }
}

#[async_trait]
impl MembershipClient for FakeMembershipClient {
    async fn delete_member(&self, _cluster: &ClusterRef, member_id: u64) -> Result<()> {
        self.delete_failures.write().await.check()?;
        self.deleted_members.write().await.push(member_id);
        Ok(())
    }

    async fn get_store_status(&self, address: &MemberAddress) -> Result<StoreLiveStatus> {
        *self.status_checks.write().await += 1;
        self.store_statuses
            .read()
            .await
            .get(&address.pod_name)
            .cloned()
            .ok_or_else(|| {
                OperatorError::ExternalServiceError(format!(
                    "no store status served for {}",
                    address.host()
                ))
            })
    }
}

/// Cluster record store enforcing optimistic concurrency on
/// `resource_version`
#[derive(Default)]
pub struct FakeClusterStore {
    clusters: Arc<RwLock<BTreeMap<String, ManagedCluster>>>,
    pending_conflicts: Arc<RwLock<usize>>,
    updates: Arc<RwLock<usize>>,
    get_failures: Arc<RwLock<FailureInjector>>,
}

impl FakeClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, cluster: ManagedCluster) {
        self.clusters
            .write()
            .await
            .insert(key(&cluster.namespace, &cluster.name), cluster);
    }

    /// Stored record, without going through the trait.
    pub async fn stored(&self, namespace: &str, name: &str) -> Option<ManagedCluster> {
        self.clusters.read().await.get(&key(namespace, name)).cloned()
    }

    /// Apply `change` to the stored record as a concurrent writer would,
    /// bumping its resource version.
    pub async fn concurrent_write<F>(&self, namespace: &str, name: &str, change: F)
    where
        F: FnOnce(&mut ManagedCluster),
    {
        if let Some(cluster) = self.clusters.write().await.get_mut(&key(namespace, name)) {
            change(cluster);
            cluster.resource_version += 1;
        }
    }

    /// The next `count` status writes lose a race against another writer.
    pub async fn inject_conflicts(&self, count: usize) {
        *self.pending_conflicts.write().await = count;
    }

    pub async fn set_get_error(&self, message: &str, after: usize) {
        self.get_failures.write().await.arm(message, after);
    }

    /// Successful status writes so far.
    pub async fn updates(&self) -> usize {
        *self.updates.read().await
    }
}

#[async_trait]
impl ClusterStore for FakeClusterStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ManagedCluster> {
        self.get_failures.write().await.check()?;
        self.clusters
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(format!("cluster {}/{}", namespace, name)))
    }

    async fn update_status(&self, cluster: &ManagedCluster) -> Result<ManagedCluster> {
        let mut clusters = self.clusters.write().await;
        let stored = clusters
            .get_mut(&key(&cluster.namespace, &cluster.name))
            .ok_or_else(|| {
                OperatorError::NotFound(format!("cluster {}", cluster.cluster_ref()))
            })?;

        {
            let mut pending = self.pending_conflicts.write().await;
            if *pending > 0 {
                *pending -= 1;
                stored.resource_version += 1;
            }
        }

        if stored.resource_version != cluster.resource_version {
            return Err(OperatorError::Conflict(format!(
                "cluster {} resource version {} is stale, stored is {}",
                cluster.cluster_ref(),
                cluster.resource_version,
                stored.resource_version
            )));
        }

        stored.status = cluster.status.clone();
        stored.resource_version += 1;
        *self.updates.write().await += 1;
        Ok(stored.clone())
    }
}

/// Compute group directory
#[derive(Default)]
pub struct FakeGroupControl {
    groups: Arc<RwLock<BTreeMap<String, ComputeGroup>>>,
    updates: Arc<RwLock<Vec<ComputeGroup>>>,
}

impl FakeGroupControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, group: ComputeGroup) {
        self.groups
            .write()
            .await
            .insert(key(&group.namespace, &group.name), group);
    }

    /// Every group written through the trait, in call order.
    pub async fn updates(&self) -> Vec<ComputeGroup> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl GroupControl for FakeGroupControl {
    async fn get_group(&self, namespace: &str, name: &str) -> Result<Option<ComputeGroup>> {
        Ok(self.groups.read().await.get(&key(namespace, name)).cloned())
    }

    async fn update_group(&self, group: &ComputeGroup) -> Result<ComputeGroup> {
        let mut stored = group.clone();
        stored.resource_version += 1;
        self.groups
            .write()
            .await
            .insert(key(&group.namespace, &group.name), stored.clone());
        self.updates.write().await.push(stored.clone());
        Ok(stored)
    }
}
