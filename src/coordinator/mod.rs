//! Request Coordinator
//!
//! Per-request state machine:
//!
//! ```text
//! CommitOpen --open_reveal--> RevealOpen --finalize--> Finalized
//!                                            |
//!                                            +--(ratio >= threshold)--> Disputed
//!                                                                          |
//!                                                       AuditClosed <--close_audit--+
//! ```
//!
//! Observers commit `SHA-256(value, nonce, identity)` while the commit
//! phase is open and reveal the preimage once it closes. Finalize
//! aggregates the reveals and either settles immediately or raises an
//! audit.

mod commitment;
mod request;
mod service;

pub use commitment::{Commitment, commitment_hash};
pub use request::{RequestRecord, RequestResult, RequestSnapshot, RequestStatus, Reveal};
pub use service::RequestCoordinator;
