mod common;

use chrono::{Duration, Utc};

use common::{test_config, TestEnvironment};
use rust_quorum_ops::core::cluster::{DeferReason, PassAction};
use rust_quorum_ops::core::traits::ClaimControl;
use rust_quorum_ops::domain::ManagedCluster;
use rust_quorum_ops::error::OperatorError;
use rust_quorum_ops::testing::test_data_factory::{
    compute_group, failure_member, one_not_ready_member, pod_with_claims, storage_claim,
    three_member_cluster,
};

const MEMBER_ID: u64 = 12891273174085095651;

async fn seed_failing_member(env: &TestEnvironment) -> ManagedCluster {
    let mut cluster = three_member_cluster();
    one_not_ready_member(&mut cluster, Utc::now() - Duration::minutes(10));
    env.store.insert(cluster.clone()).await;
    env.pods
        .insert(pod_with_claims("basic-store-1", &["data-1", "data-2"]))
        .await;
    env.claims
        .insert(storage_claim("data-1", "pvc-1-uid-1", "basic-store-1"))
        .await;
    env.claims
        .insert(storage_claim("data-2", "pvc-1-uid-2", "basic-store-1"))
        .await;
    cluster
}

fn member_deleted_events(env: &TestEnvironment) -> usize {
    env.recorder
        .lines()
        .iter()
        .filter(|line| line.starts_with("MemberDeleted "))
        .count()
}

#[tokio::test]
async fn test_failover_marks_then_reaps_on_next_pass() {
    let env = TestEnvironment::new();
    seed_failing_member(&env).await;
    env.groups.insert(compute_group(3, 0, "rev-a", "rev-a")).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(err.is_requeue());
    let stored = env.store.stored("default", "basic").await.unwrap();
    let failure = &stored.status.failure_members["basic-store-1"];
    assert!(!failure.member_deleted);
    assert_eq!(failure.claim_uid_set.len(), 2);
    assert!(env.membership.deleted_members().await.is_empty());
    assert!(env.pods.deleted().await.is_empty());
    assert!(env.claims.deleted().await.is_empty());

    let report = env.reconciler.reconcile("default", "basic").await.unwrap();

    let PassAction::Failover(failover) = &report.action else {
        panic!("expected a failover pass, got {:?}", report.action);
    };
    assert!(failover.marked.is_empty());
    assert_eq!(failover.reaped, vec!["basic-store-1".to_string()]);
    assert!(report.status_written);
    assert_eq!(report.group_replicas, Some(4));

    let stored = env.store.stored("default", "basic").await.unwrap();
    let failure = &stored.status.failure_members["basic-store-1"];
    assert!(failure.member_deleted);
    assert_eq!(failure.claim_uid_set.len(), 2);

    assert_eq!(env.membership.deleted_members().await, vec![MEMBER_ID]);
    assert_eq!(env.pods.deleted().await, vec!["basic-store-1".to_string()]);
    let mut claims = env.claims.deleted().await;
    claims.sort();
    assert_eq!(claims, vec!["data-1".to_string(), "data-2".to_string()]);
    assert_eq!(member_deleted_events(&env), 1);
}

#[tokio::test]
async fn test_claim_failure_keeps_member_pending_and_retry_finishes() {
    let env = TestEnvironment::new();
    seed_failing_member(&env).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();
    assert!(err.is_requeue());

    env.claims.set_delete_error("claim api unavailable", 0).await;
    for _ in 0..2 {
        let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

        assert!(err.to_string().contains("claim api unavailable"));
        let stored = env.store.stored("default", "basic").await.unwrap();
        let failure = &stored.status.failure_members["basic-store-1"];
        assert!(!failure.member_deleted);
        assert_eq!(failure.claim_uid_set.len(), 2);
        assert_eq!(env.pods.deleted().await.len(), 1);
    }
    assert_eq!(member_deleted_events(&env), 0);

    env.claims.clear_errors().await;
    let report = env.reconciler.reconcile("default", "basic").await.unwrap();

    let PassAction::Failover(failover) = &report.action else {
        panic!("expected a failover pass, got {:?}", report.action);
    };
    assert_eq!(failover.deferred[0].1, DeferReason::AlreadyMarked);
    assert_eq!(failover.reaped, vec!["basic-store-1".to_string()]);
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(stored.status.failure_members["basic-store-1"].member_deleted);
    // The pod was already gone, so only the claims are touched again.
    assert_eq!(env.pods.deleted().await.len(), 1);
    assert_eq!(env.claims.deleted().await.len(), 2);
    assert_eq!(
        env.membership.deleted_members().await,
        vec![MEMBER_ID, MEMBER_ID, MEMBER_ID]
    );
    assert_eq!(member_deleted_events(&env), 1);

    env.reconciler.reconcile("default", "basic").await.unwrap();
    assert_eq!(member_deleted_events(&env), 1);
}

#[tokio::test]
async fn test_claim_deletion_stops_at_first_error() {
    let env = TestEnvironment::new();
    let mut cluster = three_member_cluster();
    one_not_ready_member(&mut cluster, Utc::now() - Duration::minutes(10));
    env.store.insert(cluster).await;
    env.pods
        .insert(pod_with_claims("basic-store-1", &["data-1", "data-2", "data-3"]))
        .await;
    for (name, uid) in [("data-1", "uid-1"), ("data-2", "uid-2"), ("data-3", "uid-3")] {
        env.claims.insert(storage_claim(name, uid, "basic-store-1")).await;
    }

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();
    assert!(err.is_requeue());

    env.claims.set_delete_error("claim api unavailable", 1).await;
    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(err.to_string().contains("claim api unavailable"));
    assert_eq!(env.claims.deleted().await, vec!["data-1".to_string()]);
    // data-2 failed and data-3 was never attempted.
    assert_eq!(env.claims.delete_requests().await, 2);
    assert!(env.claims.get_claim("default", "data-3").await.unwrap().is_some());
    let stored = env.store.stored("default", "basic").await.unwrap();
    let failure = &stored.status.failure_members["basic-store-1"];
    assert!(!failure.member_deleted);
    assert_eq!(failure.claim_uid_set.len(), 3);
}

#[tokio::test]
async fn test_terminating_pod_is_not_deleted_but_claims_are() {
    let env = TestEnvironment::new();
    seed_failing_member(&env).await;
    let mut pod = pod_with_claims("basic-store-1", &["data-1", "data-2"]);
    pod.deletion_timestamp = Some(Utc::now());
    env.pods.insert(pod).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();
    assert!(err.is_requeue());
    env.reconciler.reconcile("default", "basic").await.unwrap();

    assert!(env.pods.deleted().await.is_empty());
    assert_eq!(env.claims.deleted().await.len(), 2);
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(stored.status.failure_members["basic-store-1"].member_deleted);
}

#[tokio::test]
async fn test_quorum_break_marks_nothing() {
    let env = TestEnvironment::new();
    let now = Utc::now();
    let mut cluster = three_member_cluster();
    for pod in ["basic-store-0", "basic-store-1"] {
        let member = cluster.status.members.get_mut(pod).unwrap();
        member.health = false;
        member.last_transition_time = Some(now - Duration::minutes(10));
    }
    env.store.insert(cluster).await;

    let report = env
        .reconciler
        .reconcile_at("default", "basic", now)
        .await
        .unwrap();

    assert!(!report.status_written);
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(stored.status.failure_members.is_empty());
    assert!(env.membership.deleted_members().await.is_empty());
    assert_eq!(env.recorder.lines().len(), 2);
}

#[tokio::test]
async fn test_partial_progress_survives_conflicts() {
    let env = TestEnvironment::new();
    seed_failing_member(&env).await;
    env.membership.set_delete_error("membership api down", 0).await;
    env.store.inject_conflicts(2).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(err.is_requeue());
    let stored = env.store.stored("default", "basic").await.unwrap();
    let failure = &stored.status.failure_members["basic-store-1"];
    assert!(!failure.member_deleted);
    assert_eq!(failure.member_id, MEMBER_ID.to_string());
    assert!(!stored.status.members["basic-store-1"].health);
    assert_eq!(env.store.updates().await, 1);

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(err.to_string().contains("membership api down"));
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(!stored.status.failure_members["basic-store-1"].member_deleted);
    assert!(env.pods.deleted().await.is_empty());
}

#[tokio::test]
async fn test_unsaved_mark_tears_nothing_down() {
    let env = TestEnvironment::new();
    seed_failing_member(&env).await;
    env.store.inject_conflicts(10).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(err.is_conflict());
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(stored.status.failure_members.is_empty());
    assert!(env.membership.deleted_members().await.is_empty());
    assert!(env.pods.deleted().await.is_empty());
    assert!(env.claims.deleted().await.is_empty());

    // The pod came back with fresh storage under the same claim name.
    env.claims
        .insert(storage_claim("data-1", "uid-replacement", "basic-store-1"))
        .await;
    env.store.inject_conflicts(0).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();
    assert!(err.is_requeue());
    env.reconciler.reconcile("default", "basic").await.unwrap();

    let stored = env.store.stored("default", "basic").await.unwrap();
    let failure = &stored.status.failure_members["basic-store-1"];
    assert!(failure.member_deleted);
    assert!(failure.claim_uid_set.contains("uid-replacement"));
    assert_eq!(env.membership.deleted_members().await, vec![MEMBER_ID]);
    assert_eq!(env.pods.deleted().await, vec!["basic-store-1".to_string()]);
    assert_eq!(env.claims.deleted().await.len(), 2);
}

#[tokio::test]
async fn test_recovery_clears_bookkeeping_and_restores_group_size() {
    let env = TestEnvironment::new();
    let mut cluster = three_member_cluster();
    for (pod, id) in [("basic-store-1", "1"), ("basic-store-3", "3")] {
        let mut failure = failure_member(pod, id, &[]);
        failure.member_deleted = true;
        cluster.status.failure_members.insert(pod.into(), failure);
    }
    env.store.insert(cluster).await;
    env.groups.insert(compute_group(5, 0, "rev-a", "rev-a")).await;

    let report = env.reconciler.reconcile("default", "basic").await.unwrap();

    let PassAction::Recovery(recovery) = report.action else {
        panic!("expected a recovery pass");
    };
    assert_eq!(recovery.cleared, 2);
    assert_eq!(recovery.desired_replicas, 3);
    assert_eq!(report.group_replicas, Some(3));
    let stored = env.store.stored("default", "basic").await.unwrap();
    assert!(stored.status.failure_members.is_empty());
    assert_eq!(stored.spec.replicas, 3);
}

#[tokio::test]
async fn test_invalid_member_id_fails_without_teardown() {
    let env = TestEnvironment::new();
    let mut cluster = three_member_cluster();
    one_not_ready_member(&mut cluster, Utc::now() - Duration::minutes(10));
    cluster.status.failure_members.insert(
        "basic-store-1".into(),
        failure_member("basic-store-1", "wrong-id", &[]),
    );
    env.store.insert(cluster).await;
    env.pods.insert(pod_with_claims("basic-store-1", &[])).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(matches!(err, OperatorError::InvalidMemberId { .. }));
    assert!(err.is_fatal());
    assert!(env.pods.deleted().await.is_empty());
    assert!(env.membership.deleted_members().await.is_empty());
}

#[tokio::test]
async fn test_unsynced_status_writes_nothing() {
    let env = TestEnvironment::new();
    let mut cluster = three_member_cluster();
    cluster.status.synced = false;
    one_not_ready_member(&mut cluster, Utc::now() - Duration::minutes(10));
    env.store.insert(cluster).await;

    let err = env.reconciler.reconcile("default", "basic").await.unwrap_err();

    assert!(matches!(err, OperatorError::StatusNotSynced { .. }));
    assert_eq!(env.store.updates().await, 0);
}

#[tokio::test]
async fn test_missing_cluster_is_not_found() {
    let env = TestEnvironment::with_config(test_config());

    let err = env.reconciler.reconcile("default", "absent").await.unwrap_err();

    assert!(matches!(err, OperatorError::NotFound(_)));
}
