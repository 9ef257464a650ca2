//! HTTP API for the oracle
//!
//! Thin JSON surface over [`RequestCoordinator`]. Callers assert their
//! identity in the request body; there is no signature check.
//!
//! - Protocol API (requests, commit/reveal, finalize, disputes)
//! - Accounts API (nodes, ledger, admin settings)

pub mod accounts;
pub mod protocol;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::coordinator::RequestCoordinator;
use crate::error::OracleError;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<RequestCoordinator>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(coordinator: Arc<RequestCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }
}

/// Handler error: status code plus the error's display text
pub type ApiError = (StatusCode, String);

pub fn status_for(error: &OracleError) -> StatusCode {
    match error {
        OracleError::UnknownRequest(_) | OracleError::UnknownDispute(_) => StatusCode::NOT_FOUND,

        OracleError::Unauthorized(_)
        | OracleError::NotCreator(_)
        | OracleError::NotProposer(_)
        | OracleError::NotInCommittee(_)
        | OracleError::NotAuditor(_) => StatusCode::FORBIDDEN,

        OracleError::AlreadyRegistered { .. }
        | OracleError::InsufficientPool { .. }
        | OracleError::InsufficientAuditors { .. }
        | OracleError::TooEarly(_)
        | OracleError::WrongPhase { .. }
        | OracleError::DuplicateCommit(_)
        | OracleError::NoCommitment(_)
        | OracleError::AlreadyRevealed(_)
        | OracleError::NoReveals
        | OracleError::AlreadyFinalized(_)
        | OracleError::DisputeExists(_)
        | OracleError::DuplicateVote(_)
        | OracleError::AlreadyClosed(_)
        | OracleError::InsufficientBalance { .. }
        | OracleError::NothingToClaim(_) => StatusCode::CONFLICT,

        OracleError::InsufficientStake { .. }
        | OracleError::CommitmentMismatch(_)
        | OracleError::InvalidParams(_)
        | OracleError::LengthMismatch(_)
        | OracleError::EscrowExceeded { .. }
        | OracleError::Overflow(_) => StatusCode::BAD_REQUEST,
    }
}

pub fn reject(error: OracleError) -> ApiError {
    let status = status_for(&error);
    debug!(status = status.as_u16(), error = %error, "Request rejected");
    (status, error.to_string())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub requests: usize,
    pub nodes: usize,
    pub started_at: String,
    pub timestamp: String,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        requests: state.coordinator.request_count(),
        nodes: state.coordinator.registry().node_count().await,
        started_at: state.started_at.to_rfc3339(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Full API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(protocol::routes())
        .merge(accounts::routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Identity;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&OracleError::UnknownRequest(1)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&OracleError::Unauthorized(Identity::ZERO)), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&OracleError::AlreadyFinalized(1)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&OracleError::CommitmentMismatch(Identity::ZERO)),
            StatusCode::BAD_REQUEST
        );
        let short = OracleError::InsufficientBalance {
            identity: Identity::ZERO,
            required: 2,
            available: 1,
        };
        assert_eq!(status_for(&short), StatusCode::CONFLICT);
    }

    #[test]
    fn test_reject_carries_message() {
        let (status, body) = reject(OracleError::NoReveals);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, "no reveals to aggregate");
    }
}
