use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::commitment::Commitment;
use crate::aggregation::AggregationResult;
use crate::config::ResolvedParams;
use crate::dispute::AuditOutcome;
use crate::ledger::SettlementReceipt;
use crate::registry::Identity;

/// Request lifecycle. Strictly forward-moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    CommitOpen,
    RevealOpen,
    Finalized,
    Disputed,
    AuditClosed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Created => "created",
            RequestStatus::CommitOpen => "commit_open",
            RequestStatus::RevealOpen => "reveal_open",
            RequestStatus::Finalized => "finalized",
            RequestStatus::Disputed => "disputed",
            RequestStatus::AuditClosed => "audit_closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    pub observer: Identity,
    pub value: u64,
    pub nonce: u128,
}

/// Mutable state of one request, guarded by its own lock
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: u64,
    pub query: String,
    pub creator: Identity,
    pub reward_pool: u128,
    pub params: ResolvedParams,
    pub status: RequestStatus,
    /// Ordered by selection score
    pub committee: Vec<Identity>,
    pub commitments: HashMap<Identity, Commitment>,
    /// In reveal order
    pub reveals: Vec<Reveal>,
    pub result: Option<AggregationResult>,
    pub audit_ref: Option<u64>,
    pub audit_outcome: Option<AuditOutcome>,
    pub settlement: Option<SettlementReceipt>,
    pub created_at: DateTime<Utc>,
    pub reveal_opened_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub fn has_revealed(&self, observer: &Identity) -> bool {
        self.reveals.iter().any(|r| r.observer == *observer)
    }

    pub fn all_revealed(&self) -> bool {
        self.reveals.len() == self.commitments.len()
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        let committed: Vec<Identity> = self
            .committee
            .iter()
            .filter(|id| self.commitments.contains_key(id))
            .copied()
            .collect();

        RequestSnapshot {
            id: self.id,
            query: self.query.clone(),
            creator: self.creator,
            reward_pool: self.reward_pool,
            params: self.params,
            status: self.status,
            committee: self.committee.clone(),
            committed,
            revealed: self.reveals.iter().map(|r| (r.observer, r.value)).collect(),
            result: self.result.clone(),
            audit_ref: self.audit_ref,
            audit_outcome: self.audit_outcome.clone(),
            settlement: self.settlement.clone(),
            created_at: self.created_at,
            reveal_opened_at: self.reveal_opened_at,
        }
    }

    pub fn result_view(&self) -> RequestResult {
        match &self.result {
            Some(result) => RequestResult {
                consensus: result.consensus,
                lower_bound: result.lower_bound,
                upper_bound: result.upper_bound,
                finalized: result.finalized,
            },
            None => RequestResult::default(),
        }
    }
}

/// Read-only copy of a request. Nonces are never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub id: u64,
    pub query: String,
    pub creator: Identity,
    pub reward_pool: u128,
    pub params: ResolvedParams,
    pub status: RequestStatus,
    pub committee: Vec<Identity>,
    pub committed: Vec<Identity>,
    pub revealed: Vec<(Identity, u64)>,
    pub result: Option<AggregationResult>,
    pub audit_ref: Option<u64>,
    pub audit_outcome: Option<AuditOutcome>,
    pub settlement: Option<SettlementReceipt>,
    pub created_at: DateTime<Utc>,
    pub reveal_opened_at: Option<DateTime<Utc>>,
}

/// Consensus summary, all zero until finalized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResult {
    pub consensus: u64,
    pub lower_bound: u64,
    pub upper_bound: u64,
    pub finalized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_forward_ordered() {
        assert!(RequestStatus::Created < RequestStatus::CommitOpen);
        assert!(RequestStatus::RevealOpen < RequestStatus::Finalized);
        assert!(RequestStatus::Disputed < RequestStatus::AuditClosed);
        assert_eq!(RequestStatus::RevealOpen.to_string(), "reveal_open");
    }
}
