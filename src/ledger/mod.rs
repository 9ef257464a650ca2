//! Incentive Ledger
//!
//! Reputation scores and withdrawable reward balances per identity.
//!
//! ## Score Model
//!
//! - Reputation starts at 0 and is a signed integer
//! - Honest reporters gain +1 per settled round
//! - Reporters judged against are halved: `floor(rep / 2)`
//! - No-shows are untouched
//!
//! The only write path is [`IncentiveLedger::settle`] (or `settle_with`),
//! which applies a whole [`SettlementPlan`] or nothing.

mod book;
mod policy;

pub use book::{AccountView, IncentiveLedger, SettlementPlan, SettlementReceipt};
pub use policy::{
    ReferencePolicy, ReporterOutcome, RoundOutcome, SettlementPolicy, Verdict, halving_delta,
    pro_rata,
};
