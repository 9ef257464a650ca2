//! Request lifecycle: create, commit, reveal, finalize, audit, settle

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::commitment::{Commitment, commitment_hash};
use super::request::{RequestRecord, RequestResult, RequestSnapshot, RequestStatus, Reveal};
use crate::aggregation::{self, AggregationResult};
use crate::clock::{Clock, SystemClock, window_elapsed};
use crate::config::{OracleConfig, ProtocolDefaults, RegistryConfig, RequestParams, ResolvedParams};
use crate::dispute::{AuditOutcome, AuditParams, Dispute, DisputeResolver};
use crate::error::{OracleError, Result};
use crate::events::{EventBus, OracleEvent};
use crate::ledger::{
    AccountView, IncentiveLedger, ReferencePolicy, ReporterOutcome, RoundOutcome, SettlementPolicy,
    SettlementReceipt, Verdict,
};
use crate::registry::{
    DeterministicSeeds, EntropySeeds, Identity, Node, NodeRegistry, Role, SeedProvider, SeedPurpose,
};

fn audit_params(params: &ResolvedParams) -> AuditParams {
    AuditParams {
        auditor_count: params.auditor_count,
        supermajority_x10000: params.supermajority_x10000,
        audit_quorum_x10000: params.audit_quorum_x10000,
        audit_window_secs: params.audit_window_secs,
    }
}

/// Owns every request and drives it through its state machine.
///
/// Each request has its own lock; nothing is held across requests. Calls
/// that touch other components take locks in the order request, dispute,
/// registry or ledger.
pub struct RequestCoordinator {
    registry: Arc<NodeRegistry>,
    ledger: Arc<IncentiveLedger>,
    disputes: Arc<DisputeResolver>,
    seeds: Arc<dyn SeedProvider>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn SettlementPolicy>,
    defaults: RwLock<ProtocolDefaults>,
    admin: Identity,
    events: EventBus,
    requests: DashMap<u64, Arc<Mutex<RequestRecord>>>,
    next_id: AtomicU64,
}

impl RequestCoordinator {
    pub fn new(
        admin: Identity,
        registry_config: RegistryConfig,
        defaults: ProtocolDefaults,
        seeds: Arc<dyn SeedProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        defaults.validate()?;

        let events = EventBus::new();
        let ledger = Arc::new(IncentiveLedger::new());
        let registry = Arc::new(NodeRegistry::new(registry_config, ledger.clone()));
        let disputes = Arc::new(DisputeResolver::new(
            registry.clone(),
            seeds.clone(),
            clock.clone(),
            events.clone(),
            admin,
        ));

        Ok(Self {
            registry,
            ledger,
            disputes,
            seeds,
            clock,
            policy: Arc::new(ReferencePolicy),
            defaults: RwLock::new(defaults),
            admin,
            events,
            requests: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Production wiring: system clock, and entropy seeds unless a fixed
    /// selection seed is configured
    pub fn from_config(config: &OracleConfig) -> anyhow::Result<Self> {
        let seeds: Arc<dyn SeedProvider> = match config.selection_seed()? {
            Some(base) => Arc::new(DeterministicSeeds::new(base)),
            None => Arc::new(EntropySeeds),
        };
        let coordinator = Self::new(
            config.admin.admin_identity,
            config.registry,
            config.protocol.clone(),
            seeds,
            Arc::new(SystemClock),
        )?;
        Ok(coordinator)
    }

    pub fn with_policy(mut self, policy: Arc<dyn SettlementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<IncentiveLedger> {
        &self.ledger
    }

    pub fn disputes(&self) -> &Arc<DisputeResolver> {
        &self.disputes
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn admin(&self) -> Identity {
        self.admin
    }

    fn record(&self, request_id: u64) -> Result<Arc<Mutex<RequestRecord>>> {
        self.requests
            .get(&request_id)
            .map(|r| r.value().clone())
            .ok_or(OracleError::UnknownRequest(request_id))
    }

    fn authorize(&self, caller: Identity) -> Result<()> {
        if caller != self.admin {
            warn!(caller = %caller, "Privileged call rejected");
            return Err(OracleError::Unauthorized(caller));
        }
        Ok(())
    }

    fn publish(&self, event: OracleEvent) {
        self.events.publish(self.clock.now(), event);
    }

    pub async fn register(&self, identity: Identity, role: Role, stake: u128) -> Result<Node> {
        self.registry.register(identity, role, stake).await
    }

    /// Open a request and draw its observer committee. Parameters are
    /// snapshotted here; later default changes do not reach it. The reward
    /// pool is moved from the creator's balance into escrow, so the creator
    /// must have deposited or earned it first.
    pub async fn create_request(
        &self,
        creator: Identity,
        query: impl Into<String>,
        reward_pool: u128,
        overrides: RequestParams,
    ) -> Result<u64> {
        let node = self.registry.get_node(&creator).await;
        if node.role != Some(Role::Proposer) {
            warn!(creator = %creator, "Request from non-proposer rejected");
            return Err(OracleError::NotProposer(creator));
        }

        let params = self.defaults.read().await.resolve(&overrides)?;
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let seed = self.seeds.seed(request_id, SeedPurpose::Observers);
        let committee = self
            .registry
            .select_committee(Role::Observer, params.k_observers, &seed)
            .await?;
        self.ledger.escrow(request_id, &creator, reward_pool).await?;

        let query = query.into();
        let record = RequestRecord {
            id: request_id,
            query: query.clone(),
            creator,
            reward_pool,
            params,
            status: RequestStatus::CommitOpen,
            committee: committee.clone(),
            commitments: HashMap::new(),
            reveals: Vec::new(),
            result: None,
            audit_ref: None,
            audit_outcome: None,
            settlement: None,
            created_at: self.clock.now(),
            reveal_opened_at: None,
        };
        self.requests.insert(request_id, Arc::new(Mutex::new(record)));

        info!(
            request_id,
            creator = %creator,
            observers = committee.len(),
            reward_pool,
            "Request created"
        );
        self.publish(OracleEvent::RequestCreated {
            request_id,
            creator,
            query,
        });
        self.publish(OracleEvent::ObserversSelected {
            request_id,
            observers: committee,
        });

        Ok(request_id)
    }

    pub async fn commit(
        &self,
        request_id: u64,
        caller: Identity,
        commitment: Commitment,
    ) -> Result<()> {
        let entry = self.record(request_id)?;
        let mut record = entry.lock().await;

        if record.status != RequestStatus::CommitOpen {
            return Err(OracleError::WrongPhase {
                request_id,
                expected: RequestStatus::CommitOpen,
                actual: record.status,
            });
        }
        if !record.committee.contains(&caller) {
            warn!(request_id, caller = %caller, "Commit from outside the committee");
            return Err(OracleError::NotInCommittee(caller));
        }
        if record.commitments.contains_key(&caller) {
            return Err(OracleError::DuplicateCommit(caller));
        }

        record.commitments.insert(caller, commitment);
        debug!(
            request_id,
            observer = %caller,
            committed = record.commitments.len(),
            "Commitment stored"
        );
        self.publish(OracleEvent::CommitAccepted {
            request_id,
            observer: caller,
        });
        Ok(())
    }

    /// Move to the reveal phase. The creator may do so at any time; anyone
    /// else only once the commit window has elapsed.
    pub async fn open_reveal(&self, request_id: u64, caller: Identity) -> Result<()> {
        let entry = self.record(request_id)?;
        let mut record = entry.lock().await;

        if record.status != RequestStatus::CommitOpen {
            return Err(OracleError::WrongPhase {
                request_id,
                expected: RequestStatus::CommitOpen,
                actual: record.status,
            });
        }
        if caller != record.creator {
            match record.params.commit_window_secs {
                None => return Err(OracleError::NotCreator(caller)),
                Some(window) if !window_elapsed(self.clock.as_ref(), record.created_at, window) => {
                    return Err(OracleError::TooEarly(format!(
                        "commit window of {window}s still open"
                    )));
                }
                Some(_) => {}
            }
        }

        record.status = RequestStatus::RevealOpen;
        record.reveal_opened_at = Some(self.clock.now());
        info!(
            request_id,
            opened_by = %caller,
            commitments = record.commitments.len(),
            "Reveal phase opened"
        );
        self.publish(OracleEvent::RevealOpened {
            request_id,
            opened_by: caller,
        });
        Ok(())
    }

    pub async fn reveal(
        &self,
        request_id: u64,
        caller: Identity,
        value: u64,
        nonce: u128,
    ) -> Result<()> {
        let entry = self.record(request_id)?;
        let mut record = entry.lock().await;

        if record.status != RequestStatus::RevealOpen {
            return Err(OracleError::WrongPhase {
                request_id,
                expected: RequestStatus::RevealOpen,
                actual: record.status,
            });
        }
        let stored = *record
            .commitments
            .get(&caller)
            .ok_or(OracleError::NoCommitment(caller))?;
        if record.has_revealed(&caller) {
            return Err(OracleError::AlreadyRevealed(caller));
        }
        if commitment_hash(value, nonce, &caller) != stored {
            warn!(request_id, observer = %caller, "Reveal does not match commitment");
            return Err(OracleError::CommitmentMismatch(caller));
        }

        record.reveals.push(Reveal {
            observer: caller,
            value,
            nonce,
        });
        debug!(request_id, observer = %caller, value, "Reveal accepted");
        self.publish(OracleEvent::RevealAccepted {
            request_id,
            observer: caller,
            value,
        });
        Ok(())
    }

    /// Aggregate the reveals and either settle right away or hand the
    /// request to an audit. Fails without writing anything if the audit
    /// committee or the settlement cannot be formed.
    pub async fn finalize(&self, request_id: u64, caller: Identity) -> Result<AggregationResult> {
        let entry = self.record(request_id)?;
        let mut record = entry.lock().await;

        match record.status {
            RequestStatus::RevealOpen => {}
            RequestStatus::Created | RequestStatus::CommitOpen => {
                return Err(OracleError::WrongPhase {
                    request_id,
                    expected: RequestStatus::RevealOpen,
                    actual: record.status,
                });
            }
            RequestStatus::Finalized | RequestStatus::Disputed | RequestStatus::AuditClosed => {
                return Err(OracleError::AlreadyFinalized(request_id));
            }
        }
        if record.reveals.is_empty() {
            return Err(OracleError::NoReveals);
        }
        if let Some(window) = record.params.reveal_window_secs {
            let opened = record.reveal_opened_at.unwrap_or(record.created_at);
            let waiting =
                !record.all_revealed() && !window_elapsed(self.clock.as_ref(), opened, window);
            if caller != record.creator && waiting {
                return Err(OracleError::TooEarly(format!(
                    "{} of {} commitments revealed",
                    record.reveals.len(),
                    record.commitments.len()
                )));
            }
        }

        let values: Vec<(Identity, u64)> = record
            .reveals
            .iter()
            .map(|r| (r.observer, r.value))
            .collect();
        let observers: Vec<Identity> = values.iter().map(|(id, _)| *id).collect();
        let reputations = self.ledger.reputations(&observers).await;
        let result = aggregation::compute(&values, &record.params.aggregation(), &|id: &Identity| {
            reputations.get(id).copied().unwrap_or(0)
        })?;

        let disputed = result.anomaly_ratio_x10000 >= record.params.audit_threshold_x10000;
        let stats = OracleEvent::AnomalyStats {
            request_id,
            anomalies: result.anomaly_count,
            total: result.total_count,
            ratio_x10000: result.anomaly_ratio_x10000,
        };

        if disputed {
            let dispute = self
                .disputes
                .initiate(request_id, result.consensus, audit_params(&record.params))
                .await?;

            record.result = Some(result.clone());
            record.audit_ref = Some(request_id);
            record.status = RequestStatus::Disputed;

            info!(
                request_id,
                consensus = result.consensus,
                ratio_x10000 = result.anomaly_ratio_x10000,
                auditors = dispute.audit_committee.len(),
                "Request finalized and disputed"
            );
            self.publish(stats);
            self.publish(OracleEvent::AuditInitiated {
                request_id,
                disputed_value: dispute.disputed_value,
                auditors: dispute.audit_committee,
            });
        } else {
            let receipt = self
                .settle_round(&record, &result, Verdict::Accepted, Vec::new())
                .await?;

            record.result = Some(result.clone());
            record.settlement = Some(receipt.clone());
            record.status = RequestStatus::Finalized;

            info!(
                request_id,
                consensus = result.consensus,
                ratio_x10000 = result.anomaly_ratio_x10000,
                "Request finalized"
            );
            self.publish(stats);
            self.publish_settled(&receipt);
        }

        Ok(result)
    }

    /// Close the audit of a disputed request and settle it under the
    /// verdict. The dispute stays open if settlement fails.
    pub async fn close_audit(&self, request_id: u64, caller: Identity) -> Result<AuditOutcome> {
        let entry = self.record(request_id)?;
        let mut record = entry.lock().await;

        match record.status {
            RequestStatus::Disputed => {}
            RequestStatus::AuditClosed => return Err(OracleError::AlreadyClosed(request_id)),
            actual => {
                return Err(OracleError::WrongPhase {
                    request_id,
                    expected: RequestStatus::Disputed,
                    actual,
                });
            }
        }
        let result = record
            .result
            .clone()
            .ok_or(OracleError::UnknownDispute(request_id))?;

        let (outcome, receipt) = {
            let snapshot: &RequestRecord = &record;
            self.disputes
                .close_with(request_id, caller, |outcome| async move {
                    self.settle_round(snapshot, &result, outcome.verdict, outcome.votes)
                        .await
                })
                .await?
        };

        record.audit_outcome = Some(outcome.clone());
        record.settlement = Some(receipt.clone());
        record.status = RequestStatus::AuditClosed;

        info!(
            request_id,
            verdict = ?outcome.verdict,
            unanimous = outcome.unanimous,
            "Request settled after audit"
        );
        self.publish_settled(&receipt);
        Ok(outcome)
    }

    async fn settle_round(
        &self,
        record: &RequestRecord,
        result: &AggregationResult,
        verdict: Verdict,
        audit_votes: Vec<(Identity, bool)>,
    ) -> Result<SettlementReceipt> {
        let outcome = RoundOutcome {
            request_id: record.id,
            creator: record.creator,
            reward_pool: record.reward_pool,
            reporters: result
                .reporters
                .iter()
                .map(|c| ReporterOutcome {
                    identity: c.identity,
                    weight: c.weight,
                    anomalous: c.anomalous,
                })
                .collect(),
            verdict,
            audit_votes,
        };
        let policy = Arc::clone(&self.policy);
        let (_, receipt) = self
            .ledger
            .settle_with(record.id, |reputation| policy.plan(&outcome, reputation))
            .await?;
        Ok(receipt)
    }

    fn publish_settled(&self, receipt: &SettlementReceipt) {
        self.publish(OracleEvent::Settled {
            request_id: receipt.request_id,
            payees: receipt.payees.clone(),
            total_paid: receipt.total_paid,
        });
    }

    pub async fn submit_vote(
        &self,
        request_id: u64,
        caller: Identity,
        support_original: bool,
    ) -> Result<()> {
        self.disputes.submit_vote(request_id, caller, support_original).await
    }

    pub async fn get_request(&self, request_id: u64) -> Result<RequestSnapshot> {
        let entry = self.record(request_id)?;
        let record = entry.lock().await;
        Ok(record.snapshot())
    }

    pub async fn get_request_result(&self, request_id: u64) -> Result<RequestResult> {
        let entry = self.record(request_id)?;
        let record = entry.lock().await;
        Ok(record.result_view())
    }

    pub async fn get_request_observers(&self, request_id: u64) -> Result<Vec<Identity>> {
        let entry = self.record(request_id)?;
        let record = entry.lock().await;
        Ok(record.committee.clone())
    }

    pub async fn status(&self, request_id: u64) -> Result<RequestStatus> {
        let entry = self.record(request_id)?;
        let status = entry.lock().await.status;
        Ok(status)
    }

    /// 0 when the request was never disputed
    pub async fn get_disputed_value(&self, request_id: u64) -> u64 {
        self.disputes.get_disputed_value(request_id).await
    }

    pub async fn get_dispute(&self, request_id: u64) -> Result<Dispute> {
        self.disputes.get_dispute(request_id).await
    }

    pub async fn account(&self, identity: &Identity) -> AccountView {
        self.ledger.account(identity).await
    }

    /// Credit funds to `identity`, e.g. to back a future reward pool
    pub async fn deposit(&self, identity: Identity, amount: u128) -> Result<AccountView> {
        self.ledger.deposit(&identity, amount).await?;
        info!(identity = %identity, amount, "Deposit received");
        self.publish(OracleEvent::Deposited { identity, amount });
        Ok(self.ledger.account(&identity).await)
    }

    pub async fn claim(&self, identity: Identity) -> Result<u128> {
        let amount = self.ledger.claim(&identity).await?;
        info!(identity = %identity, amount, "Rewards claimed");
        self.publish(OracleEvent::Claimed { identity, amount });
        Ok(amount)
    }

    pub async fn defaults(&self) -> ProtocolDefaults {
        self.defaults.read().await.clone()
    }

    /// Replace the defaults used by requests created from now on
    pub async fn set_defaults(&self, caller: Identity, defaults: ProtocolDefaults) -> Result<()> {
        self.authorize(caller)?;
        defaults.validate()?;
        info!(
            k_observers = defaults.k_observers,
            lambda_x100 = defaults.lambda_x100,
            audit_threshold_x10000 = defaults.audit_threshold_x10000,
            use_weights = defaults.use_weights,
            "Protocol defaults updated"
        );
        *self.defaults.write().await = defaults;
        Ok(())
    }

    pub async fn set_min_stake(&self, caller: Identity, role: Role, amount: u128) -> Result<()> {
        self.authorize(caller)?;
        self.registry.set_min_stake(role, amount).await;
        Ok(())
    }

    /// Explicit settlement by the admin identity, bypassing the policy.
    /// Payouts still come out of the request's remaining escrow.
    pub async fn settle_manual(
        &self,
        caller: Identity,
        request_id: u64,
        payees: Vec<Identity>,
        amounts: Vec<u128>,
        rep_targets: Vec<Identity>,
        rep_deltas: Vec<i64>,
    ) -> Result<SettlementReceipt> {
        self.authorize(caller)?;
        let receipt = self
            .ledger
            .settle(request_id, payees, amounts, rep_targets, rep_deltas)
            .await?;
        self.publish_settled(&receipt);
        Ok(receipt)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}
