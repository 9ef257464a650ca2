use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregation::BPS;
use crate::ledger::Verdict;
use crate::registry::Identity;

/// Audit settings snapshotted from the request's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditParams {
    pub auditor_count: usize,
    pub supermajority_x10000: u64,
    pub audit_quorum_x10000: u64,
    pub audit_window_secs: Option<u64>,
}

/// Audit of one anomalous request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub request_id: u64,
    pub disputed_value: u64,
    pub audit_committee: Vec<Identity>,
    /// In the order they were cast, `true` = support original
    pub votes: Vec<(Identity, bool)>,
    pub closed: bool,
    pub unanimous: bool,
    pub support_original: bool,
    pub deadlock: bool,
    pub params: AuditParams,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn has_voted(&self, auditor: &Identity) -> bool {
        self.votes.iter().any(|(who, _)| who == auditor)
    }

    pub fn all_voted(&self) -> bool {
        self.votes.len() == self.audit_committee.len()
    }
}

/// Result of closing a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub request_id: u64,
    pub unanimous: bool,
    pub support_original: bool,
    pub deadlock: bool,
    pub votes_for: usize,
    pub votes_against: usize,
    pub verdict: Verdict,
    pub votes: Vec<(Identity, bool)>,
}

/// `ceil(committee * quorum_x10000 / 10000)`
pub fn quorum(committee_size: usize, audit_quorum_x10000: u64) -> usize {
    let scaled = committee_size as u128 * audit_quorum_x10000 as u128;
    scaled.div_ceil(BPS as u128) as usize
}

/// Tally `votes` cast by a committee of `committee_size`.
///
/// Below quorum, or with neither side reaching the supermajority, the
/// audit deadlocks and the original consensus stands.
pub fn tally(
    request_id: u64,
    committee_size: usize,
    votes: &[(Identity, bool)],
    params: &AuditParams,
) -> AuditOutcome {
    let cast = votes.len();
    let votes_for = votes.iter().filter(|(_, support)| *support).count();
    let votes_against = cast - votes_for;

    let unanimous = cast > 0 && (votes_for == cast || votes_against == cast);
    let super_x = params.supermajority_x10000 as u128;
    let reaches = |n: usize| n as u128 * BPS as u128 >= super_x * cast as u128;

    let verdict = if cast == 0 || cast < quorum(committee_size, params.audit_quorum_x10000) {
        Verdict::Deadlocked
    } else if reaches(votes_for) {
        Verdict::Confirmed
    } else if reaches(votes_against) {
        Verdict::Overturned
    } else {
        Verdict::Deadlocked
    };

    AuditOutcome {
        request_id,
        unanimous,
        support_original: verdict.upholds_consensus(),
        deadlock: verdict == Verdict::Deadlocked,
        votes_for,
        votes_against,
        verdict,
        votes: votes.to_vec(),
    }
}
