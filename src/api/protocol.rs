//! Request and dispute endpoints
//!
//! Endpoints:
//!   POST /requests                  -> Create a request
//!   GET  /requests/{id}             -> Request snapshot
//!   GET  /requests/{id}/result      -> Consensus summary
//!   GET  /requests/{id}/observers   -> Observer committee
//!   POST /requests/{id}/commit      -> Submit a commitment
//!   POST /requests/{id}/open-reveal -> Close commits, open reveals
//!   POST /requests/{id}/reveal      -> Reveal value and nonce
//!   POST /requests/{id}/finalize    -> Aggregate reveals
//!   GET  /disputes/{id}             -> Dispute state
//!   GET  /disputes/{id}/value       -> Disputed consensus (0 if none)
//!   POST /disputes/{id}/votes       -> Auditor vote
//!   POST /disputes/{id}/close       -> Close audit and settle

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, ApiState, reject};
use crate::aggregation::AggregationResult;
use crate::config::RequestParams;
use crate::coordinator::{Commitment, RequestResult, RequestSnapshot};
use crate::dispute::{AuditOutcome, Dispute};
use crate::registry::Identity;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub creator: Identity,
    pub query: String,
    #[serde(default)]
    pub reward_pool: u128,
    #[serde(default)]
    pub params: RequestParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequestResponse {
    pub request_id: u64,
    pub observers: Vec<Identity>,
}

#[derive(Debug, Deserialize)]
pub struct CommitBody {
    pub caller: Identity,
    pub commitment: Commitment,
}

#[derive(Debug, Deserialize)]
pub struct CallerBody {
    pub caller: Identity,
}

#[derive(Debug, Deserialize)]
pub struct RevealBody {
    pub caller: Identity,
    pub value: u64,
    pub nonce: u128,
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub caller: Identity,
    pub support_original: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub request_id: u64,
    pub accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisputedValueResponse {
    pub request_id: u64,
    pub disputed_value: u64,
}

fn accepted(request_id: u64) -> Json<Accepted> {
    Json(Accepted {
        request_id,
        accepted: true,
    })
}

// ============================================================================
// Request Handlers
// ============================================================================

pub async fn create_request(
    State(state): State<ApiState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<CreateRequestResponse>, ApiError> {
    let coordinator = &state.coordinator;
    let request_id = coordinator
        .create_request(body.creator, body.query, body.reward_pool, body.params)
        .await
        .map_err(reject)?;
    let observers = coordinator
        .get_request_observers(request_id)
        .await
        .map_err(reject)?;

    Ok(Json(CreateRequestResponse {
        request_id,
        observers,
    }))
}

pub async fn get_request(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
) -> Result<Json<RequestSnapshot>, ApiError> {
    state
        .coordinator
        .get_request(request_id)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn get_request_result(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
) -> Result<Json<RequestResult>, ApiError> {
    state
        .coordinator
        .get_request_result(request_id)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn get_request_observers(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
) -> Result<Json<Vec<Identity>>, ApiError> {
    state
        .coordinator
        .get_request_observers(request_id)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn commit(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<CommitBody>,
) -> Result<Json<Accepted>, ApiError> {
    state
        .coordinator
        .commit(request_id, body.caller, body.commitment)
        .await
        .map_err(reject)?;
    Ok(accepted(request_id))
}

pub async fn open_reveal(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<CallerBody>,
) -> Result<Json<Accepted>, ApiError> {
    state
        .coordinator
        .open_reveal(request_id, body.caller)
        .await
        .map_err(reject)?;
    Ok(accepted(request_id))
}

pub async fn reveal(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<RevealBody>,
) -> Result<Json<Accepted>, ApiError> {
    state
        .coordinator
        .reveal(request_id, body.caller, body.value, body.nonce)
        .await
        .map_err(reject)?;
    Ok(accepted(request_id))
}

pub async fn finalize(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<CallerBody>,
) -> Result<Json<AggregationResult>, ApiError> {
    info!(request_id, caller = %body.caller, "Finalize requested");
    state
        .coordinator
        .finalize(request_id, body.caller)
        .await
        .map(Json)
        .map_err(reject)
}

// ============================================================================
// Dispute Handlers
// ============================================================================

pub async fn get_dispute(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
) -> Result<Json<Dispute>, ApiError> {
    state
        .coordinator
        .get_dispute(request_id)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn get_disputed_value(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
) -> Json<DisputedValueResponse> {
    Json(DisputedValueResponse {
        request_id,
        disputed_value: state.coordinator.get_disputed_value(request_id).await,
    })
}

pub async fn submit_vote(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<VoteBody>,
) -> Result<Json<Accepted>, ApiError> {
    state
        .coordinator
        .submit_vote(request_id, body.caller, body.support_original)
        .await
        .map_err(reject)?;
    Ok(accepted(request_id))
}

pub async fn close_dispute(
    State(state): State<ApiState>,
    Path(request_id): Path<u64>,
    Json(body): Json<CallerBody>,
) -> Result<Json<AuditOutcome>, ApiError> {
    state
        .coordinator
        .close_audit(request_id, body.caller)
        .await
        .map(Json)
        .map_err(reject)
}

// ============================================================================
// Router
// ============================================================================

pub fn routes() -> Router<ApiState> {
    Router::new()
        // Requests
        .route("/requests", post(create_request))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/result", get(get_request_result))
        .route("/requests/{id}/observers", get(get_request_observers))
        .route("/requests/{id}/commit", post(commit))
        .route("/requests/{id}/open-reveal", post(open_reveal))
        .route("/requests/{id}/reveal", post(reveal))
        .route("/requests/{id}/finalize", post(finalize))
        // Disputes
        .route("/disputes/{id}", get(get_dispute))
        .route("/disputes/{id}/value", get(get_disputed_value))
        .route("/disputes/{id}/votes", post(submit_vote))
        .route("/disputes/{id}/close", post(close_dispute))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::clock::ManualClock;
    use crate::config::{ProtocolDefaults, RegistryConfig};
    use crate::coordinator::{RequestCoordinator, commitment_hash};
    use crate::registry::{DeterministicSeeds, Role};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn id(n: u8) -> Identity {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Identity::new(bytes)
    }

    async fn app() -> (Router, Arc<RequestCoordinator>) {
        let stakes = RegistryConfig {
            min_stake_proposer: 1,
            min_stake_observer: 1,
            min_stake_auditor: 1,
        };
        let defaults = ProtocolDefaults {
            k_observers: 3,
            auditor_count: 2,
            ..Default::default()
        };
        let coordinator = Arc::new(
            RequestCoordinator::new(
                id(250),
                stakes,
                defaults,
                Arc::new(DeterministicSeeds::new([1u8; 32])),
                Arc::new(ManualClock::default()),
            )
            .unwrap(),
        );
        coordinator.register(id(1), Role::Proposer, 1).await.unwrap();
        for n in 10..13 {
            coordinator.register(id(n), Role::Observer, 1).await.unwrap();
        }
        (create_router(ApiState::new(coordinator.clone())), coordinator)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_request() {
        let (app, coordinator) = app().await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/requests",
                serde_json::json!({ "creator": id(1), "query": "BTC/USD", "reward_pool": 90 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        coordinator.deposit(id(1), 90).await.unwrap();
        let response = app
            .clone()
            .oneshot(post_json(
                "/requests",
                serde_json::json!({ "creator": id(1), "query": "BTC/USD", "reward_pool": 90 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        assert_eq!(created["request_id"], 2);
        assert_eq!(created["observers"].as_array().unwrap().len(), 3);

        let response = app.oneshot(get("/requests/2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = json_body(response).await;
        assert_eq!(snapshot["status"], "commit_open");
        assert_eq!(snapshot["query"], "BTC/USD");
    }

    #[tokio::test]
    async fn test_unknown_request_is_404() {
        let (app, _) = app().await;
        let response = app.oneshot(get("/requests/77/result")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_commit_reveal_finalize_over_http() {
        let (app, coordinator) = app().await;
        let request_id = coordinator
            .create_request(id(1), "q", 0, RequestParams::default())
            .await
            .unwrap();
        let observers = coordinator.get_request_observers(request_id).await.unwrap();

        for (observer, value) in observers.iter().zip([100u64, 99, 101]) {
            let commitment = commitment_hash(value, 5, observer);
            let response = app
                .clone()
                .oneshot(post_json(
                    "/requests/1/commit",
                    serde_json::json!({ "caller": observer, "commitment": commitment }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(post_json("/requests/1/open-reveal", serde_json::json!({ "caller": id(10) })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(post_json("/requests/1/open-reveal", serde_json::json!({ "caller": id(1) })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Wrong nonce
        let response = app
            .clone()
            .oneshot(post_json(
                "/requests/1/reveal",
                serde_json::json!({ "caller": observers[0], "value": 100, "nonce": 6 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        for (observer, value) in observers.iter().zip([100u64, 99, 101]) {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/requests/1/reveal",
                    serde_json::json!({ "caller": observer, "value": value, "nonce": 5 }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(post_json("/requests/1/finalize", serde_json::json!({ "caller": id(1) })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["consensus"], 100);

        let response = app
            .clone()
            .oneshot(post_json("/requests/1/finalize", serde_json::json!({ "caller": id(1) })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.clone().oneshot(get("/requests/1/result")).await.unwrap();
        let result = json_body(response).await;
        assert_eq!(result["lower_bound"], 98);
        assert_eq!(result["upper_bound"], 102);
        assert_eq!(result["finalized"], true);

        let response = app.oneshot(get("/disputes/1/value")).await.unwrap();
        assert_eq!(json_body(response).await["disputed_value"], 0);
    }
}
