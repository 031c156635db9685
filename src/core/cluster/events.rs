//! Human-readable event records keyed to the owning cluster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::ClusterRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// One entry per member lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// Member reported unhealthy on this pass
    Unhealthy {
        pod_name: String,
        member_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Member added to the failure bookkeeping
    MarkedForRemoval {
        namespace: String,
        pod_name: String,
        member_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Member deregistered from the cluster's own membership
    MemberDeleted {
        namespace: String,
        pod_name: String,
        member_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Someone took the compute group off partition control
    ManualBypassDetected {
        namespace: String,
        group_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClusterEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ClusterEvent::MemberDeleted { .. } => EventType::Normal,
            _ => EventType::Warning,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ClusterEvent::Unhealthy { .. } => "Unhealthy",
            ClusterEvent::MarkedForRemoval { .. } => "MemberUnhealthy",
            ClusterEvent::MemberDeleted { .. } => "MemberDeleted",
            ClusterEvent::ManualBypassDetected { .. } => "UpdateStrategyModified",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ClusterEvent::Unhealthy {
                pod_name,
                member_id,
                ..
            } => format!("{}({}) is unhealthy", pod_name, member_id),
            ClusterEvent::MarkedForRemoval {
                namespace,
                pod_name,
                member_id,
                ..
            } => format!(
                "{}/{}({}) is unhealthy, marked as failure member",
                namespace, pod_name, member_id
            ),
            ClusterEvent::MemberDeleted {
                namespace,
                pod_name,
                member_id,
                ..
            } => format!(
                "failure member {}/{}({}) deleted from cluster",
                namespace, pod_name, member_id
            ),
            ClusterEvent::ManualBypassDetected {
                namespace,
                group_name,
                ..
            } => format!(
                "compute group {}/{} update strategy has been modified manually",
                namespace, group_name
            ),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClusterEvent::Unhealthy { timestamp, .. }
            | ClusterEvent::MarkedForRemoval { timestamp, .. }
            | ClusterEvent::MemberDeleted { timestamp, .. }
            | ClusterEvent::ManualBypassDetected { timestamp, .. } => *timestamp,
        }
    }
}

/// A recorded event as it appears in the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub cluster: ClusterRef,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(cluster: &ClusterRef, event: &ClusterEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster: cluster.clone(),
            event_type: event.event_type(),
            reason: event.reason().to_string(),
            message: event.message(),
            timestamp: event.occurred_at(),
        }
    }

    /// `"{reason} {message}"`, the line format the sink renders.
    pub fn line(&self) -> String {
        format!("{} {}", self.reason, self.message)
    }
}

/// Append-only event sink
pub trait EventRecorder: Send + Sync {
    fn record(&self, cluster: &ClusterRef, event: ClusterEvent);
}

/// Emits events as structured log lines
#[derive(Debug, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, cluster: &ClusterRef, event: ClusterEvent) {
        let record = EventRecord::new(cluster, &event);
        match record.event_type {
            EventType::Normal => info!(
                cluster = %record.cluster,
                reason = %record.reason,
                "{}", record.message
            ),
            EventType::Warning => warn!(
                cluster = %record.cluster,
                reason = %record.reason,
                "{}", record.message
            ),
        }
    }
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct InMemoryEventRecorder {
    records: Mutex<Vec<EventRecord>>,
}

impl InMemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Rendered lines, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.records().iter().map(EventRecord::line).collect()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<String> {
        match self.records.lock() {
            Ok(mut records) => records.drain(..).map(|record| record.line()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, cluster: &ClusterRef, event: ClusterEvent) {
        if let Ok(mut records) = self.records.lock() {
            records.push(EventRecord::new(cluster, &event));
        }
    }
}
