//! Quorum safety check for removing a member
//!
//! The voting set is the union of members and peer members, deduplicated by
//! member id with the member view winning. Removing a candidate is safe only
//! when the healthy voters other than the candidate still form a strict
//! majority of all voters.

use std::collections::HashSet;

use crate::domain::ClusterStatus;

/// Outcome of a quorum check. A refusal is a deferral, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumDecision {
    Approved {
        healthy_remaining: usize,
        total_voters: usize,
    },
    WouldBreakQuorum {
        healthy_remaining: usize,
        total_voters: usize,
    },
}

impl QuorumDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, QuorumDecision::Approved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Voter {
    id: String,
    healthy: bool,
}

/// Snapshot of the voting set taken from one status observation
#[derive(Debug, Clone)]
pub struct QuorumGuard {
    voters: Vec<Voter>,
}

impl QuorumGuard {
    pub fn from_status(status: &ClusterStatus) -> Self {
        let mut seen = HashSet::new();
        let voters = status
            .members
            .values()
            .chain(status.peer_members.values())
            .filter(|member| seen.insert(member.id.clone()))
            .map(|member| Voter {
                id: member.id.clone(),
                healthy: member.health,
            })
            .collect();

        Self { voters }
    }

    pub fn total_voters(&self) -> usize {
        self.voters.len()
    }

    pub fn healthy_voters(&self) -> usize {
        self.voters.iter().filter(|voter| voter.healthy).count()
    }

    /// Healthy voters other than `candidate_id`.
    pub fn healthy_excluding(&self, candidate_id: &str) -> usize {
        self.voters
            .iter()
            .filter(|voter| voter.healthy && voter.id != candidate_id)
            .count()
    }

    /// Approve removal iff `2 * healthy_excluding > total`. Exactly half is
    /// not a majority.
    pub fn check_removal(&self, candidate_id: &str) -> QuorumDecision {
        let healthy_remaining = self.healthy_excluding(candidate_id);
        let total_voters = self.total_voters();

        if 2 * healthy_remaining > total_voters {
            QuorumDecision::Approved {
                healthy_remaining,
                total_voters,
            }
        } else {
            QuorumDecision::WouldBreakQuorum {
                healthy_remaining,
                total_voters,
            }
        }
    }
}
