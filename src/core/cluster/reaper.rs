//! Ordered teardown of a failed member
//!
//! Deregistration from the cluster's own membership comes first so the
//! database never sees storage vanish under a member it still counts. Pod
//! and storage-claim deletion follow. Every step tolerates being repeated,
//! so a pass that stopped half-way simply runs again; only when all steps
//! succeed is the failure member flagged as deleted.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::core::cluster::events::{ClusterEvent, EventRecorder};
use crate::core::traits::{ClaimControl, MembershipClient, PodControl};
use crate::domain::{FailureMember, ManagedCluster, Pod, StorageClaim};
use crate::error::{OperatorError, Result};

/// What a reap attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    /// All steps completed and the member is now flagged deleted
    Reaped { pods_deleted: usize, claims_deleted: usize },
    /// Nothing to do; the member was already flagged deleted
    AlreadyDeleted,
    /// No failure member is tracked under that pod name
    NotTracked,
}

pub struct MemberReaper {
    pods: Arc<dyn PodControl>,
    claims: Arc<dyn ClaimControl>,
    membership: Arc<dyn MembershipClient>,
    recorder: Arc<dyn EventRecorder>,
}

impl MemberReaper {
    pub fn new(
        pods: Arc<dyn PodControl>,
        claims: Arc<dyn ClaimControl>,
        membership: Arc<dyn MembershipClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            pods,
            claims,
            membership,
            recorder,
        }
    }

    /// Tear down the member tracked under `pod_name`. Stops at the first
    /// failing step and leaves `member_deleted` untouched in that case.
    pub async fn reap(&self, cluster: &mut ManagedCluster, pod_name: &str) -> Result<ReapOutcome> {
        let Some(failure) = cluster.status.failure_members.get(pod_name).cloned() else {
            return Ok(ReapOutcome::NotTracked);
        };
        if failure.member_deleted {
            return Ok(ReapOutcome::AlreadyDeleted);
        }

        let member_id = parse_member_id(&failure)?;
        let cluster_ref = cluster.cluster_ref();
        let namespace = cluster.namespace.clone();

        if let Err(e) = self.membership.delete_member(&cluster_ref, member_id).await {
            error!(
                cluster = %cluster_ref,
                pod = %pod_name,
                member_id = member_id,
                error = %e,
                "Failed to delete failure member from cluster membership"
            );
            return Err(e);
        }
        debug!(cluster = %cluster_ref, pod = %pod_name, member_id = member_id, "Member deregistered");

        let pod = self.pods.get_pod(&namespace, pod_name).await?;
        let mut pods_deleted = 0;
        match &pod {
            Some(pod) if pod.is_terminating() => {
                debug!(cluster = %cluster_ref, pod = %pod_name, "Pod already terminating");
            }
            Some(_) => {
                self.pods.delete_pod(&namespace, pod_name).await?;
                pods_deleted += 1;
                info!(cluster = %cluster_ref, pod = %pod_name, "Deleted failure member pod");
            }
            None => {
                debug!(cluster = %cluster_ref, pod = %pod_name, "Pod already removed");
            }
        }

        let mut claims_deleted = 0;
        for claim in self.member_claims(&namespace, pod_name, pod.as_ref()).await? {
            if !owned_by_failure(&failure, &claim) {
                debug!(
                    cluster = %cluster_ref,
                    claim = %claim.name,
                    uid = %claim.uid,
                    "Skipping claim not recorded for this failure member"
                );
                continue;
            }
            if claim.is_terminating() {
                debug!(cluster = %cluster_ref, claim = %claim.name, "Claim already terminating");
                continue;
            }
            self.claims.delete_claim(&namespace, &claim.name).await?;
            claims_deleted += 1;
            info!(
                cluster = %cluster_ref,
                pod = %pod_name,
                claim = %claim.name,
                "Deleted failure member storage claim"
            );
        }

        if let Some(entry) = cluster.status.failure_members.get_mut(pod_name) {
            entry.member_deleted = true;
        }
        // Only on the false to true flip.
        self.recorder.record(
            &cluster_ref,
            ClusterEvent::MemberDeleted {
                namespace,
                pod_name: pod_name.to_string(),
                member_id: failure.member_id.clone(),
                timestamp: Utc::now(),
            },
        );
        info!(
            cluster = %cluster_ref,
            pod = %pod_name,
            member_id = member_id,
            "Failure member torn down"
        );

        Ok(ReapOutcome::Reaped {
            pods_deleted,
            claims_deleted,
        })
    }

    /// Storage claims that belong to the member: those mounted by the pod
    /// when it still exists, otherwise those labelled with its name.
    pub async fn member_claims(
        &self,
        namespace: &str,
        pod_name: &str,
        pod: Option<&Pod>,
    ) -> Result<Vec<StorageClaim>> {
        let Some(pod) = pod else {
            return self.claims.list_claims_for_pod(namespace, pod_name).await;
        };

        let mut seen = BTreeSet::new();
        let mut claims = Vec::new();
        for claim_name in pod.claim_names() {
            if !seen.insert(claim_name.to_string()) {
                continue;
            }
            if let Some(claim) = self.claims.get_claim(namespace, claim_name).await? {
                claims.push(claim);
            }
        }
        Ok(claims)
    }
}

/// Member ids are stored as text and must be validated before any
/// deregistration is attempted.
pub fn parse_member_id(failure: &FailureMember) -> Result<u64> {
    failure
        .member_id
        .trim()
        .parse::<u64>()
        .map_err(|source| OperatorError::InvalidMemberId {
            pod: failure.pod_name.clone(),
            id: failure.member_id.clone(),
            source,
        })
}

fn owned_by_failure(failure: &FailureMember, claim: &StorageClaim) -> bool {
    failure.claim_uid_set.is_empty() || failure.claim_uid_set.contains(&claim.uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::events::InMemoryEventRecorder;
    use crate::testing::fakes::{FakeClaimControl, FakeMembershipClient, FakePodControl};
    use crate::testing::test_data_factory::{failure_member, pod_with_claims, storage_claim, three_member_cluster};

    struct Harness {
        pods: Arc<FakePodControl>,
        claims: Arc<FakeClaimControl>,
        membership: Arc<FakeMembershipClient>,
        recorder: Arc<InMemoryEventRecorder>,
        reaper: MemberReaper,
    }

    fn harness() -> Harness {
        let pods = Arc::new(FakePodControl::new());
        let claims = Arc::new(FakeClaimControl::new());
        let membership = Arc::new(FakeMembershipClient::new());
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let reaper = MemberReaper::new(
            pods.clone(),
            claims.clone(),
            membership.clone(),
            recorder.clone(),
        );
        Harness {
            pods,
            claims,
            membership,
            recorder,
            reaper,
        }
    }

    #[test]
    fn test_parse_member_id() {
        let mut failure = failure_member("basic-store-1", "12891273174085095651", &[]);
        assert_eq!(parse_member_id(&failure).unwrap(), 12891273174085095651);

        failure.member_id = "wrong-id".into();
        assert!(matches!(
            parse_member_id(&failure),
            Err(OperatorError::InvalidMemberId { .. })
        ));

        failure.member_id = "-1".into();
        assert!(parse_member_id(&failure).is_err());
    }

    #[tokio::test]
    async fn test_reap_deletes_member_pod_and_recorded_claims() {
        let h = harness();
        let mut cluster = three_member_cluster();
        cluster.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "1", &["uid-a", "uid-b"]),
        );
        h.pods
            .insert(pod_with_claims("basic-store-1", &["data-a", "data-b"]))
            .await;
        h.claims.insert(storage_claim("data-a", "uid-a", "basic-store-1")).await;
        h.claims.insert(storage_claim("data-b", "uid-b", "basic-store-1")).await;

        let outcome = h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap();

        assert_eq!(
            outcome,
            ReapOutcome::Reaped {
                pods_deleted: 1,
                claims_deleted: 2
            }
        );
        assert!(cluster.status.failure_members["basic-store-1"].member_deleted);
        assert_eq!(h.membership.deleted_members().await, vec![1]);
        assert!(h.pods.get_pod("default", "basic-store-1").await.unwrap().is_none());
        assert!(h.claims.get_claim("default", "data-a").await.unwrap().is_none());
        assert!(h.claims.get_claim("default", "data-b").await.unwrap().is_none());
        assert_eq!(h.recorder.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_error_aborts_without_skipping_ahead() {
        let h = harness();
        let mut cluster = three_member_cluster();
        cluster.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "1", &[]),
        );
        h.pods
            .insert(pod_with_claims("basic-store-1", &["data-a", "data-b", "data-c"]))
            .await;
        for (name, uid) in [("data-a", "uid-a"), ("data-b", "uid-b"), ("data-c", "uid-c")] {
            h.claims.insert(storage_claim(name, uid, "basic-store-1")).await;
        }
        h.claims.set_delete_error("claim api unavailable", 1).await;

        let err = h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap_err();

        assert!(err.to_string().contains("claim api unavailable"));
        assert_eq!(h.claims.deleted().await, vec!["data-a".to_string()]);
        assert!(h.claims.get_claim("default", "data-b").await.unwrap().is_some());
        assert!(h.claims.get_claim("default", "data-c").await.unwrap().is_some());
        assert!(!cluster.status.failure_members["basic-store-1"].member_deleted);
        assert!(h.recorder.lines().is_empty());

        h.claims.clear_errors().await;
        h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap();

        assert!(cluster.status.failure_members["basic-store-1"].member_deleted);
        assert_eq!(h.membership.deleted_members().await, vec![1, 1]);
        assert_eq!(h.recorder.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_claim_is_left_alone() {
        let h = harness();
        let mut cluster = three_member_cluster();
        cluster.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "1", &["uid-old"]),
        );
        h.pods.insert(pod_with_claims("basic-store-1", &["data"])).await;
        // Same name, recreated for a replacement pod.
        h.claims.insert(storage_claim("data", "uid-new", "basic-store-1")).await;

        h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap();

        assert!(cluster.status.failure_members["basic-store-1"].member_deleted);
        assert!(h.claims.get_claim("default", "data").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_recorded_set_deletes_all_discovered_claims() {
        let h = harness();
        let mut cluster = three_member_cluster();
        cluster.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "1", &[]),
        );
        h.claims.insert(storage_claim("data", "uid-a", "basic-store-1")).await;

        let outcome = h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap();

        assert_eq!(
            outcome,
            ReapOutcome::Reaped {
                pods_deleted: 0,
                claims_deleted: 1
            }
        );
        assert!(h.claims.get_claim("default", "data").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_member_id_is_hard_error_without_side_effects() {
        let h = harness();
        let mut cluster = three_member_cluster();
        cluster.status.failure_members.insert(
            "basic-store-1".into(),
            failure_member("basic-store-1", "wrong-id", &[]),
        );
        h.pods.insert(pod_with_claims("basic-store-1", &[])).await;

        let err = h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap_err();

        assert!(err.is_fatal());
        assert!(!cluster.status.failure_members["basic-store-1"].member_deleted);
        assert!(h.membership.deleted_members().await.is_empty());
        assert!(h.pods.get_pod("default", "basic-store-1").await.unwrap().is_some());
        assert!(h.recorder.lines().is_empty());
    }

    #[tokio::test]
    async fn test_untracked_and_already_deleted() {
        let h = harness();
        let mut cluster = three_member_cluster();
        assert_eq!(
            h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap(),
            ReapOutcome::NotTracked
        );

        let mut done = failure_member("basic-store-1", "1", &[]);
        done.member_deleted = true;
        cluster.status.failure_members.insert("basic-store-1".into(), done);
        assert_eq!(
            h.reaper.reap(&mut cluster, "basic-store-1").await.unwrap(),
            ReapOutcome::AlreadyDeleted
        );
        assert!(h.membership.deleted_members().await.is_empty());
    }
}
