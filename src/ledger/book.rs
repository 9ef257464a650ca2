//! Reputation, withdrawable balances and request escrow with an
//! all-or-nothing settle

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OracleError, Result};
use crate::registry::Identity;

/// Parallel arrays applied by one settlement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub payees: Vec<Identity>,
    pub amounts: Vec<u128>,
    pub rep_targets: Vec<Identity>,
    pub rep_deltas: Vec<i64>,
}

impl SettlementPlan {
    pub fn pay(&mut self, payee: Identity, amount: u128) {
        if amount > 0 {
            self.payees.push(payee);
            self.amounts.push(amount);
        }
    }

    pub fn adjust(&mut self, target: Identity, delta: i64) {
        if delta != 0 {
            self.rep_targets.push(target);
            self.rep_deltas.push(delta);
        }
    }

    pub fn total_paid(&self) -> u128 {
        self.amounts.iter().fold(0u128, |acc, a| acc.saturating_add(*a))
    }

    pub fn is_empty(&self) -> bool {
        self.payees.is_empty() && self.rep_targets.is_empty()
    }

    fn check_lengths(&self) -> Result<()> {
        if self.payees.len() != self.amounts.len() {
            return Err(OracleError::LengthMismatch(format!(
                "{} payees vs {} amounts",
                self.payees.len(),
                self.amounts.len()
            )));
        }
        if self.rep_targets.len() != self.rep_deltas.len() {
            return Err(OracleError::LengthMismatch(format!(
                "{} reputation targets vs {} deltas",
                self.rep_targets.len(),
                self.rep_deltas.len()
            )));
        }
        Ok(())
    }
}

/// What a settlement did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub request_id: u64,
    pub payees: Vec<Identity>,
    pub total_paid: u128,
    pub reputation_changes: usize,
}

/// Ledger view of one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub identity: Identity,
    pub reputation: i64,
    pub withdrawable: u128,
}

#[derive(Debug, Default)]
struct LedgerState {
    reputation: HashMap<Identity, i64>,
    withdrawable: HashMap<Identity, u128>,
    /// Reward pools held per request until settlement pays them out
    escrow: HashMap<u64, u128>,
    settlements: u64,
}

impl LedgerState {
    fn reputation_of(&self, identity: &Identity) -> i64 {
        self.reputation.get(identity).copied().unwrap_or(0)
    }

    fn withdrawable_of(&self, identity: &Identity) -> u128 {
        self.withdrawable.get(identity).copied().unwrap_or(0)
    }

    fn escrowed(&self, request_id: u64) -> u128 {
        self.escrow.get(&request_id).copied().unwrap_or(0)
    }

    /// Stage every change first and only write once all of them check out.
    /// Payouts draw down the request's escrow and may not exceed it.
    fn apply(&mut self, request_id: u64, plan: &SettlementPlan) -> Result<()> {
        plan.check_lengths()?;

        let requested = plan
            .amounts
            .iter()
            .try_fold(0u128, |acc, a| acc.checked_add(*a))
            .ok_or(OracleError::Overflow("settlement total"))?;
        let escrowed = self.escrowed(request_id);
        if requested > escrowed {
            return Err(OracleError::EscrowExceeded {
                request_id,
                requested,
                escrowed,
            });
        }

        let mut balances: HashMap<Identity, u128> = HashMap::new();
        for (payee, amount) in plan.payees.iter().zip(&plan.amounts) {
            let current = balances
                .get(payee)
                .copied()
                .unwrap_or_else(|| self.withdrawable_of(payee));
            let next = current
                .checked_add(*amount)
                .ok_or(OracleError::Overflow("withdrawable balance"))?;
            balances.insert(*payee, next);
        }

        let mut reputations: HashMap<Identity, i64> = HashMap::new();
        for (target, delta) in plan.rep_targets.iter().zip(&plan.rep_deltas) {
            let current = reputations
                .get(target)
                .copied()
                .unwrap_or_else(|| self.reputation_of(target));
            let next = current
                .checked_add(*delta)
                .ok_or(OracleError::Overflow("reputation"))?;
            reputations.insert(*target, next);
        }

        self.withdrawable.extend(balances);
        self.reputation.extend(reputations);
        if requested == escrowed {
            self.escrow.remove(&request_id);
        } else {
            self.escrow.insert(request_id, escrowed - requested);
        }
        self.settlements += 1;
        Ok(())
    }
}

/// Shared reputation and reward book
#[derive(Debug, Default)]
pub struct IncentiveLedger {
    state: Mutex<LedgerState>,
}

impl IncentiveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit value entering the system to `identity`
    pub async fn deposit(&self, identity: &Identity, amount: u128) -> Result<u128> {
        let mut state = self.state.lock().await;
        let balance = state
            .withdrawable_of(identity)
            .checked_add(amount)
            .ok_or(OracleError::Overflow("withdrawable balance"))?;
        state.withdrawable.insert(*identity, balance);
        debug!(identity = %identity, amount, balance, "Deposit credited");
        Ok(balance)
    }

    /// Move `amount` from the funder's balance into the escrow of
    /// `request_id`. Fails without touching anything if the balance is short.
    pub async fn escrow(&self, request_id: u64, funder: &Identity, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let available = state.withdrawable_of(funder);
        if available < amount {
            warn!(request_id, funder = %funder, amount, available, "Escrow rejected");
            return Err(OracleError::InsufficientBalance {
                identity: *funder,
                required: amount,
                available,
            });
        }
        let held = state
            .escrowed(request_id)
            .checked_add(amount)
            .ok_or(OracleError::Overflow("escrow"))?;

        state.escrow.insert(request_id, held);
        if available == amount {
            state.withdrawable.remove(funder);
        } else {
            state.withdrawable.insert(*funder, available - amount);
        }
        debug!(request_id, funder = %funder, amount, "Reward pool escrowed");
        Ok(())
    }

    /// Apply payouts and reputation deltas atomically. Any length mismatch,
    /// payout beyond the request's escrow or overflow rejects the whole call
    /// with nothing applied.
    pub async fn settle(
        &self,
        request_id: u64,
        payees: Vec<Identity>,
        amounts: Vec<u128>,
        rep_targets: Vec<Identity>,
        rep_deltas: Vec<i64>,
    ) -> Result<SettlementReceipt> {
        let plan = SettlementPlan {
            payees,
            amounts,
            rep_targets,
            rep_deltas,
        };
        self.settle_with(request_id, |_| plan).await.map(|(_, receipt)| receipt)
    }

    /// Build the plan from the reputations visible under the ledger lock and
    /// apply it before releasing the lock, so relative rules like halving
    /// cannot interleave with another settlement touching the same identity.
    pub async fn settle_with<F>(
        &self,
        request_id: u64,
        plan_fn: F,
    ) -> Result<(SettlementPlan, SettlementReceipt)>
    where
        F: FnOnce(&dyn Fn(&Identity) -> i64) -> SettlementPlan,
    {
        let mut state = self.state.lock().await;
        let plan = {
            let lookup = |id: &Identity| state.reputation_of(id);
            plan_fn(&lookup)
        };

        if let Err(e) = state.apply(request_id, &plan) {
            warn!(request_id, error = %e, "Settlement rejected");
            return Err(e);
        }

        let receipt = SettlementReceipt {
            request_id,
            payees: plan.payees.clone(),
            total_paid: plan.total_paid(),
            reputation_changes: plan.rep_targets.len(),
        };

        info!(
            request_id,
            payees = receipt.payees.len(),
            total_paid = receipt.total_paid,
            reputation_changes = receipt.reputation_changes,
            "Settlement applied"
        );

        Ok((plan, receipt))
    }

    /// Withdraw the full balance of `identity`
    pub async fn claim(&self, identity: &Identity) -> Result<u128> {
        let mut state = self.state.lock().await;
        let amount = state.withdrawable.remove(identity).unwrap_or(0);
        if amount == 0 {
            return Err(OracleError::NothingToClaim(*identity));
        }
        debug!(identity = %identity, amount, "Balance claimed");
        Ok(amount)
    }

    pub async fn reputation_of(&self, identity: &Identity) -> i64 {
        self.state.lock().await.reputation_of(identity)
    }

    pub async fn withdrawable_of(&self, identity: &Identity) -> u128 {
        self.state.lock().await.withdrawable_of(identity)
    }

    pub async fn escrowed(&self, request_id: u64) -> u128 {
        self.state.lock().await.escrowed(request_id)
    }

    /// Everything the ledger holds: withdrawable balances plus open escrow
    pub async fn total_held(&self) -> u128 {
        let state = self.state.lock().await;
        let balances = state.withdrawable.values();
        balances
            .chain(state.escrow.values())
            .fold(0u128, |acc, v| acc.saturating_add(*v))
    }

    /// Reputations of many identities read under one lock
    pub async fn reputations(&self, identities: &[Identity]) -> HashMap<Identity, i64> {
        let state = self.state.lock().await;
        identities
            .iter()
            .map(|id| (*id, state.reputation_of(id)))
            .collect()
    }

    pub async fn account(&self, identity: &Identity) -> AccountView {
        let state = self.state.lock().await;
        AccountView {
            identity: *identity,
            reputation: state.reputation_of(identity),
            withdrawable: state.withdrawable_of(identity),
        }
    }

    pub async fn settlement_count(&self) -> u64 {
        self.state.lock().await.settlements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Identity {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Identity::new(bytes)
    }

    const FUNDER: u8 = 200;

    /// Ledger with `amount` escrowed for `request_id`
    async fn funded(request_id: u64, amount: u128) -> IncentiveLedger {
        let ledger = IncentiveLedger::new();
        ledger.deposit(&id(FUNDER), amount).await.unwrap();
        ledger.escrow(request_id, &id(FUNDER), amount).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_settle_applies_all() {
        let ledger = funded(1, 100).await;
        let receipt = ledger
            .settle(1, vec![id(1), id(2)], vec![30, 70], vec![id(1), id(2)], vec![1, -4])
            .await
            .unwrap();

        assert_eq!(receipt.total_paid, 100);
        assert_eq!(ledger.withdrawable_of(&id(1)).await, 30);
        assert_eq!(ledger.withdrawable_of(&id(2)).await, 70);
        assert_eq!(ledger.reputation_of(&id(1)).await, 1);
        assert_eq!(ledger.reputation_of(&id(2)).await, -4);
        assert_eq!(ledger.escrowed(1).await, 0);
        assert_eq!(ledger.total_held().await, 100);
    }

    #[tokio::test]
    async fn test_length_mismatch_applies_nothing() {
        let ledger = funded(1, 30).await;
        let err = ledger
            .settle(1, vec![id(1), id(2)], vec![30], vec![id(1)], vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::LengthMismatch(_)));

        let err = ledger
            .settle(1, vec![id(1)], vec![30], vec![id(1), id(2)], vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::LengthMismatch(_)));

        assert_eq!(ledger.withdrawable_of(&id(1)).await, 0);
        assert_eq!(ledger.reputation_of(&id(1)).await, 0);
        assert_eq!(ledger.escrowed(1).await, 30);
        assert_eq!(ledger.settlement_count().await, 0);
    }

    #[tokio::test]
    async fn test_payout_beyond_escrow_applies_nothing() {
        let ledger = funded(1, 10).await;
        let err = ledger
            .settle(1, vec![id(1), id(2)], vec![6, 5], vec![id(1)], vec![1])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OracleError::EscrowExceeded {
                request_id: 1,
                requested: 11,
                escrowed: 10,
            }
        );

        // Escrow belongs to one request only
        let err = ledger.settle(2, vec![id(1)], vec![1], vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, OracleError::EscrowExceeded { escrowed: 0, .. }));

        assert_eq!(ledger.withdrawable_of(&id(1)).await, 0);
        assert_eq!(ledger.reputation_of(&id(1)).await, 0);
        assert_eq!(ledger.escrowed(1).await, 10);
    }

    #[tokio::test]
    async fn test_partial_payout_leaves_remaining_escrow() {
        let ledger = funded(3, 10).await;
        ledger.settle(3, vec![id(1)], vec![4], vec![], vec![]).await.unwrap();
        assert_eq!(ledger.escrowed(3).await, 6);
        ledger.settle(3, vec![id(2)], vec![6], vec![], vec![]).await.unwrap();
        assert_eq!(ledger.escrowed(3).await, 0);
        assert_eq!(ledger.total_held().await, 10);
    }

    #[tokio::test]
    async fn test_escrow_requires_balance() {
        let ledger = IncentiveLedger::new();
        ledger.deposit(&id(1), 7).await.unwrap();

        let err = ledger.escrow(1, &id(1), 8).await.unwrap_err();
        assert_eq!(
            err,
            OracleError::InsufficientBalance {
                identity: id(1),
                required: 8,
                available: 7,
            }
        );
        assert_eq!(ledger.withdrawable_of(&id(1)).await, 7);
        assert_eq!(ledger.escrowed(1).await, 0);

        ledger.escrow(1, &id(1), 7).await.unwrap();
        assert_eq!(ledger.withdrawable_of(&id(1)).await, 0);
        assert_eq!(ledger.escrowed(1).await, 7);

        // Zero pools need no funds
        ledger.escrow(2, &id(3), 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_overflow_applies_nothing() {
        let ledger = funded(1, u128::MAX).await;
        ledger.settle(1, vec![id(1)], vec![u128::MAX], vec![], vec![]).await.unwrap();

        ledger.deposit(&id(FUNDER), 6).await.unwrap();
        ledger.escrow(2, &id(FUNDER), 6).await.unwrap();
        let err = ledger
            .settle(2, vec![id(2), id(1)], vec![5, 1], vec![id(2)], vec![3])
            .await
            .unwrap_err();
        assert_eq!(err, OracleError::Overflow("withdrawable balance"));
        assert_eq!(ledger.withdrawable_of(&id(2)).await, 0);
        assert_eq!(ledger.reputation_of(&id(2)).await, 0);
        assert_eq!(ledger.escrowed(2).await, 6);
    }

    #[tokio::test]
    async fn test_repeated_payee_accumulates() {
        let ledger = funded(1, 11).await;
        ledger
            .settle(1, vec![id(1), id(1)], vec![5, 6], vec![id(1), id(1)], vec![2, 3])
            .await
            .unwrap();
        assert_eq!(ledger.withdrawable_of(&id(1)).await, 11);
        assert_eq!(ledger.reputation_of(&id(1)).await, 5);
    }

    #[tokio::test]
    async fn test_claim_zeroes_balance() {
        let ledger = funded(1, 42).await;
        ledger.settle(1, vec![id(1)], vec![42], vec![], vec![]).await.unwrap();

        assert_eq!(ledger.claim(&id(1)).await.unwrap(), 42);
        assert_eq!(ledger.withdrawable_of(&id(1)).await, 0);
        assert_eq!(
            ledger.claim(&id(1)).await.unwrap_err(),
            OracleError::NothingToClaim(id(1))
        );
        assert_eq!(ledger.total_held().await, 0);
    }

    #[tokio::test]
    async fn test_settle_with_sees_current_reputation() {
        let ledger = IncentiveLedger::new();
        ledger.settle(1, vec![], vec![], vec![id(1)], vec![9]).await.unwrap();

        let (plan, _) = ledger
            .settle_with(2, |rep| {
                let mut plan = SettlementPlan::default();
                let current = rep(&id(1));
                plan.adjust(id(1), current.div_euclid(2) - current);
                plan
            })
            .await
            .unwrap();

        assert_eq!(plan.rep_deltas, vec![-5]);
        assert_eq!(ledger.reputation_of(&id(1)).await, 4);
    }
}
