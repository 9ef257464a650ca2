//! Typed protocol errors
//!
//! Every failure is local to one request or one identity. Nothing here is
//! fatal to the process: the caller inspects the error and re-invokes after
//! satisfying the failed guard.

use thiserror::Error;

use crate::coordinator::RequestStatus;
use crate::registry::{Identity, Role};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("stake {provided} below {role} minimum {required}")]
    InsufficientStake {
        role: Role,
        provided: u128,
        required: u128,
    },

    #[error("{identity} already registered as {existing}")]
    AlreadyRegistered { identity: Identity, existing: Role },

    #[error("only {available} eligible {role} nodes, {needed} required")]
    InsufficientPool {
        role: Role,
        needed: usize,
        available: usize,
    },

    #[error("only {available} eligible auditors, {needed} required")]
    InsufficientAuditors { needed: usize, available: usize },

    #[error("{0} is not the creator of this request")]
    NotCreator(Identity),

    #[error("{0} is not a registered proposer")]
    NotProposer(Identity),

    #[error("too early: {0}")]
    TooEarly(String),

    #[error("request {request_id} is {actual:?}, operation requires {expected:?}")]
    WrongPhase {
        request_id: u64,
        expected: RequestStatus,
        actual: RequestStatus,
    },

    #[error("{0} is not in the observer committee")]
    NotInCommittee(Identity),

    #[error("{0} already committed")]
    DuplicateCommit(Identity),

    #[error("{0} never committed")]
    NoCommitment(Identity),

    #[error("reveal from {0} does not match its commitment")]
    CommitmentMismatch(Identity),

    #[error("{0} already revealed")]
    AlreadyRevealed(Identity),

    #[error("no reveals to aggregate")]
    NoReveals,

    #[error("request {0} already finalized")]
    AlreadyFinalized(u64),

    #[error("unknown request {0}")]
    UnknownRequest(u64),

    #[error("no dispute for request {0}")]
    UnknownDispute(u64),

    #[error("dispute for request {0} already exists")]
    DisputeExists(u64),

    #[error("{0} is not on the audit committee")]
    NotAuditor(Identity),

    #[error("{0} already voted")]
    DuplicateVote(Identity),

    #[error("dispute for request {0} already closed")]
    AlreadyClosed(u64),

    #[error("{identity} holds {available}, {required} required")]
    InsufficientBalance {
        identity: Identity,
        required: u128,
        available: u128,
    },

    #[error("settlement of request {request_id} pays {requested}, only {escrowed} escrowed")]
    EscrowExceeded {
        request_id: u64,
        requested: u128,
        escrowed: u128,
    },

    #[error("nothing to claim for {0}")]
    NothingToClaim(Identity),

    #[error("{0} is not authorized for this operation")]
    Unauthorized(Identity),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("settlement arrays differ in length: {0}")]
    LengthMismatch(String),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

pub type Result<T> = std::result::Result<T, OracleError>;
