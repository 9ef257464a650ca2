//! Dispute Resolver
//!
//! Second-layer audit for requests whose anomaly ratio crossed the audit
//! threshold. A committee of auditors, drawn with a seed independent of the
//! observer seed, votes on whether the finalized consensus stands.
//!
//! ## Tally
//!
//! - fewer votes than `ceil(committee * quorum / 10000)`: deadlock
//! - supporters reach the supermajority: confirmed
//! - opponents reach the supermajority: overturned
//! - anything else: deadlock, original consensus retained

mod resolver;
mod types;

pub use resolver::DisputeResolver;
pub use types::{AuditOutcome, AuditParams, Dispute, quorum, tally};
