//! Fixture builders shared by unit and integration tests
//!
//! The baseline is a synced three-member cluster `default/basic` whose
//! members run in the compute group `basic-store`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    ClusterSpec, ClusterStatus, ComputeGroup, FailureMember, GroupStatus, ManagedCluster, Member,
    Pod, PodTemplate, PodVolume, StorageClaim, StoreRecord, StoreState, UpdateStrategy,
    POD_NAME_LABEL, REVISION_LABEL,
};

pub const NAMESPACE: &str = "default";
pub const CLUSTER_NAME: &str = "basic";
pub const COMPONENT: &str = "store";

pub fn three_member_cluster() -> ManagedCluster {
    let mut members = BTreeMap::new();
    for (pod, id) in [
        ("basic-store-0", "0"),
        ("basic-store-1", "12891273174085095651"),
        ("basic-store-2", "2"),
    ] {
        members.insert(pod.to_string(), Member::new(pod, id, true));
    }

    ManagedCluster {
        namespace: NAMESPACE.into(),
        name: CLUSTER_NAME.into(),
        component: COMPONENT.into(),
        resource_version: 1,
        spec: ClusterSpec {
            replicas: 3,
            image: "pingcap/store:v5.1.2".into(),
            max_failover_count: None,
            tls_enabled: false,
        },
        status: ClusterStatus {
            synced: true,
            members,
            ..ClusterStatus::default()
        },
    }
}

/// Flip `basic-store-1` to unhealthy since `since`.
pub fn one_not_ready_member(cluster: &mut ManagedCluster, since: DateTime<Utc>) {
    if let Some(member) = cluster.status.members.get_mut("basic-store-1") {
        member.health = false;
        member.last_transition_time = Some(since);
    }
}

pub fn failure_member(pod_name: &str, member_id: &str, claim_uids: &[&str]) -> FailureMember {
    FailureMember {
        pod_name: pod_name.into(),
        member_id: member_id.into(),
        claim_uid_set: claim_uids.iter().map(|uid| uid.to_string()).collect(),
        member_deleted: false,
        created_at: Utc::now(),
    }
}

/// Ready pod mounting the named claims, one volume each.
pub fn pod_with_claims(name: &str, claims: &[&str]) -> Pod {
    Pod {
        namespace: NAMESPACE.into(),
        name: name.into(),
        uid: format!("{}-uid", name),
        labels: BTreeMap::new(),
        volumes: claims
            .iter()
            .map(|claim| PodVolume {
                name: claim.to_string(),
                claim_name: Some(claim.to_string()),
            })
            .collect(),
        ready: true,
        deletion_timestamp: None,
    }
}

/// Pod carrying a revision label, as the compute group stamps it.
pub fn pod_at_revision(name: &str, revision: &str, ready: bool) -> Pod {
    let mut pod = pod_with_claims(name, &[]);
    pod.labels.insert(REVISION_LABEL.into(), revision.into());
    pod.ready = ready;
    pod
}

/// Claim labelled as belonging to `pod_name`.
pub fn storage_claim(name: &str, uid: &str, pod_name: &str) -> StorageClaim {
    StorageClaim {
        namespace: NAMESPACE.into(),
        name: name.into(),
        uid: uid.into(),
        labels: BTreeMap::from([(POD_NAME_LABEL.to_string(), pod_name.to_string())]),
        deletion_timestamp: None,
    }
}

pub fn store_record(cluster: &ManagedCluster, ordinal: i32, state: StoreState) -> StoreRecord {
    StoreRecord {
        id: (1000 + ordinal).to_string(),
        pod_name: cluster.member_pod_name(ordinal),
        state,
    }
}

/// `basic-store` compute group under partition control.
pub fn compute_group(
    replicas: i32,
    partition: i32,
    current_revision: &str,
    update_revision: &str,
) -> ComputeGroup {
    ComputeGroup {
        namespace: NAMESPACE.into(),
        name: format!("{}-{}", CLUSTER_NAME, COMPONENT),
        replicas,
        delete_slots: BTreeSet::new(),
        template: PodTemplate {
            image: "pingcap/store:v5.1.2".into(),
            annotations: BTreeMap::new(),
        },
        update_strategy: UpdateStrategy::rolling(partition),
        status: GroupStatus {
            current_revision: current_revision.into(),
            update_revision: update_revision.into(),
        },
        resource_version: 1,
    }
}
