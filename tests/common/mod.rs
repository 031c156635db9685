#![allow(dead_code)]

use std::sync::Arc;

use rust_quorum_ops::config::OperatorConfig;
use rust_quorum_ops::core::cluster::{ClusterReconciler, Collaborators, InMemoryEventRecorder};
use rust_quorum_ops::error::RetryPolicy;
use rust_quorum_ops::testing::{
    FakeClaimControl, FakeClusterStore, FakeGroupControl, FakeMembershipClient, FakePodControl,
};

/// Test environment setup
pub struct TestEnvironment {
    pub store: Arc<FakeClusterStore>,
    pub pods: Arc<FakePodControl>,
    pub claims: Arc<FakeClaimControl>,
    pub groups: Arc<FakeGroupControl>,
    pub membership: Arc<FakeMembershipClient>,
    pub recorder: Arc<InMemoryEventRecorder>,
    pub reconciler: ClusterReconciler,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Arc::new(FakeClusterStore::new());
        let pods = Arc::new(FakePodControl::new());
        let claims = Arc::new(FakeClaimControl::new());
        let groups = Arc::new(FakeGroupControl::new());
        let membership = Arc::new(FakeMembershipClient::new());
        let recorder = Arc::new(InMemoryEventRecorder::new());

        let reconciler = ClusterReconciler::new(
            &config,
            Collaborators {
                clusters: store.clone(),
                pods: pods.clone(),
                claims: claims.clone(),
                groups: groups.clone(),
                membership: membership.clone(),
                recorder: recorder.clone(),
            },
        )
        .expect("valid test configuration");

        Self {
            store,
            pods,
            claims,
            groups,
            membership,
            recorder,
            reconciler,
        }
    }
}

/// Default configuration with conflict retries that do not slow tests down.
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        status_retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        },
        ..OperatorConfig::default()
    }
}
