//! Audit sub-protocol for anomalous requests

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{AuditOutcome, AuditParams, Dispute, tally};
use crate::clock::{Clock, window_elapsed};
use crate::error::{OracleError, Result};
use crate::events::{EventBus, OracleEvent};
use crate::registry::{Identity, NodeRegistry, Role, SeedProvider, SeedPurpose};

pub struct DisputeResolver {
    registry: Arc<NodeRegistry>,
    seeds: Arc<dyn SeedProvider>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    admin: Identity,
    disputes: DashMap<u64, Arc<Mutex<Dispute>>>,
}

impl DisputeResolver {
    pub fn new(
        registry: Arc<NodeRegistry>,
        seeds: Arc<dyn SeedProvider>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        admin: Identity,
    ) -> Self {
        Self {
            registry,
            seeds,
            clock,
            events,
            admin,
            disputes: DashMap::new(),
        }
    }

    fn entry(&self, request_id: u64) -> Result<Arc<Mutex<Dispute>>> {
        self.disputes
            .get(&request_id)
            .map(|d| d.value().clone())
            .ok_or(OracleError::UnknownDispute(request_id))
    }

    /// Open the audit of `request_id`, drawing the committee from a seed
    /// independent of the observer seed. Publishes nothing: the caller
    /// announces the dispute once its own state is written.
    pub async fn initiate(
        &self,
        request_id: u64,
        disputed_value: u64,
        params: AuditParams,
    ) -> Result<Dispute> {
        if self.disputes.contains_key(&request_id) {
            return Err(OracleError::DisputeExists(request_id));
        }

        let seed = self.seeds.seed(request_id, SeedPurpose::Auditors);
        let audit_committee = self
            .registry
            .select_committee(Role::Auditor, params.auditor_count, &seed)
            .await
            .map_err(|e| match e {
                OracleError::InsufficientPool { needed, available, .. } => {
                    OracleError::InsufficientAuditors { needed, available }
                }
                other => other,
            })?;

        let dispute = Dispute {
            request_id,
            disputed_value,
            audit_committee,
            votes: Vec::new(),
            closed: false,
            unanimous: false,
            support_original: false,
            deadlock: false,
            params,
            opened_at: self.clock.now(),
            closed_at: None,
        };

        match self.disputes.entry(request_id) {
            Entry::Occupied(_) => return Err(OracleError::DisputeExists(request_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(dispute.clone())));
            }
        }

        info!(
            request_id,
            disputed_value,
            auditors = dispute.audit_committee.len(),
            "Audit initiated"
        );
        Ok(dispute)
    }

    pub async fn submit_vote(
        &self,
        request_id: u64,
        caller: Identity,
        support_original: bool,
    ) -> Result<()> {
        let entry = self.entry(request_id)?;
        let mut dispute = entry.lock().await;

        if dispute.closed {
            return Err(OracleError::AlreadyClosed(request_id));
        }
        if !dispute.audit_committee.contains(&caller) {
            warn!(request_id, caller = %caller, "Vote from outside the audit committee");
            return Err(OracleError::NotAuditor(caller));
        }
        if dispute.has_voted(&caller) {
            return Err(OracleError::DuplicateVote(caller));
        }

        dispute.votes.push((caller, support_original));
        debug!(
            request_id,
            auditor = %caller,
            support_original,
            cast = dispute.votes.len(),
            "Audit vote recorded"
        );

        self.events.publish(
            self.clock.now(),
            OracleEvent::AuditVoteCast {
                request_id,
                auditor: caller,
                support_original,
            },
        );
        Ok(())
    }

    /// Close and tally without any follow-up work
    pub async fn close(&self, request_id: u64, caller: Identity) -> Result<AuditOutcome> {
        self.close_with(request_id, caller, |_| async { Ok(()) })
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Close the dispute, tally it and run `on_close` while the dispute is
    /// still locked. If `on_close` fails the dispute stays open.
    ///
    /// Allowed once every auditor voted, for the admin identity, or after
    /// the audit window.
    pub async fn close_with<F, Fut, T>(
        &self,
        request_id: u64,
        caller: Identity,
        on_close: F,
    ) -> Result<(AuditOutcome, T)>
    where
        F: FnOnce(AuditOutcome) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry = self.entry(request_id)?;
        let mut dispute = entry.lock().await;

        if dispute.closed {
            return Err(OracleError::AlreadyClosed(request_id));
        }

        let window_passed = dispute
            .params
            .audit_window_secs
            .is_some_and(|w| window_elapsed(self.clock.as_ref(), dispute.opened_at, w));
        if !(dispute.all_voted() || caller == self.admin || window_passed) {
            return Err(OracleError::TooEarly(format!(
                "{} of {} auditors voted",
                dispute.votes.len(),
                dispute.audit_committee.len()
            )));
        }

        let outcome = tally(
            request_id,
            dispute.audit_committee.len(),
            &dispute.votes,
            &dispute.params,
        );
        let extra = on_close(outcome.clone()).await?;

        let now = self.clock.now();
        dispute.closed = true;
        dispute.unanimous = outcome.unanimous;
        dispute.support_original = outcome.support_original;
        dispute.deadlock = outcome.deadlock;
        dispute.closed_at = Some(now);

        info!(
            request_id,
            closed_by = %caller,
            votes_for = outcome.votes_for,
            votes_against = outcome.votes_against,
            verdict = ?outcome.verdict,
            "Audit closed"
        );

        self.events.publish(
            now,
            OracleEvent::AuditClosed {
                request_id,
                unanimous: outcome.unanimous,
                support_original: outcome.support_original,
                deadlock: outcome.deadlock,
            },
        );
        Ok((outcome, extra))
    }

    /// Consensus value under audit, 0 when the request was never disputed
    pub async fn get_disputed_value(&self, request_id: u64) -> u64 {
        match self.entry(request_id) {
            Ok(entry) => entry.lock().await.disputed_value,
            Err(_) => 0,
        }
    }

    pub async fn get_dispute(&self, request_id: u64) -> Result<Dispute> {
        let entry = self.entry(request_id)?;
        let dispute = entry.lock().await;
        Ok(dispute.clone())
    }
}
