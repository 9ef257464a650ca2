//! Node, ledger and admin endpoints
//!
//! Endpoints:
//!   POST /nodes                -> Register or top up a node
//!   GET  /nodes/{identity}     -> Node lookup (sentinel if unknown)
//!   GET  /ledger/{identity}    -> Reputation and withdrawable balance
//!   POST /ledger/deposit       -> Credit funds for future reward pools
//!   POST /ledger/claim         -> Withdraw the full balance
//!   POST /ledger/settle        -> Explicit settlement (admin)
//!   GET  /admin/defaults       -> Current protocol defaults
//!   PUT  /admin/defaults       -> Replace protocol defaults (admin)
//!   PUT  /admin/min-stake      -> Change a role minimum (admin)

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState, reject};
use crate::config::ProtocolDefaults;
use crate::ledger::{AccountView, SettlementReceipt};
use crate::registry::{Identity, Node, Role};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub identity: Identity,
    pub role: Role,
    pub stake: u128,
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub identity: Identity,
    pub amount: u128,
}

#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    pub identity: Identity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub identity: Identity,
    pub amount: u128,
}

#[derive(Debug, Deserialize)]
pub struct SettleBody {
    pub caller: Identity,
    pub request_id: u64,
    #[serde(default)]
    pub payees: Vec<Identity>,
    #[serde(default)]
    pub amounts: Vec<u128>,
    #[serde(default)]
    pub rep_targets: Vec<Identity>,
    #[serde(default)]
    pub rep_deltas: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetDefaultsBody {
    pub caller: Identity,
    pub defaults: ProtocolDefaults,
}

#[derive(Debug, Deserialize)]
pub struct MinStakeBody {
    pub caller: Identity,
    pub role: Role,
    pub amount: u128,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MinStakeResponse {
    pub role: Role,
    pub amount: u128,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn register_node(
    State(state): State<ApiState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Node>, ApiError> {
    state
        .coordinator
        .register(body.identity, body.role, body.stake)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn get_node(State(state): State<ApiState>, Path(identity): Path<Identity>) -> Json<Node> {
    Json(state.coordinator.registry().get_node(&identity).await)
}

pub async fn get_account(
    State(state): State<ApiState>,
    Path(identity): Path<Identity>,
) -> Json<AccountView> {
    Json(state.coordinator.account(&identity).await)
}

pub async fn deposit(
    State(state): State<ApiState>,
    Json(body): Json<DepositBody>,
) -> Result<Json<AccountView>, ApiError> {
    state
        .coordinator
        .deposit(body.identity, body.amount)
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn claim(
    State(state): State<ApiState>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let amount = state.coordinator.claim(body.identity).await.map_err(reject)?;
    Ok(Json(ClaimResponse {
        identity: body.identity,
        amount,
    }))
}

pub async fn settle(
    State(state): State<ApiState>,
    Json(body): Json<SettleBody>,
) -> Result<Json<SettlementReceipt>, ApiError> {
    state
        .coordinator
        .settle_manual(
            body.caller,
            body.request_id,
            body.payees,
            body.amounts,
            body.rep_targets,
            body.rep_deltas,
        )
        .await
        .map(Json)
        .map_err(reject)
}

pub async fn get_defaults(State(state): State<ApiState>) -> Json<ProtocolDefaults> {
    Json(state.coordinator.defaults().await)
}

pub async fn set_defaults(
    State(state): State<ApiState>,
    Json(body): Json<SetDefaultsBody>,
) -> Result<Json<ProtocolDefaults>, ApiError> {
    state
        .coordinator
        .set_defaults(body.caller, body.defaults)
        .await
        .map_err(reject)?;
    Ok(Json(state.coordinator.defaults().await))
}

pub async fn set_min_stake(
    State(state): State<ApiState>,
    Json(body): Json<MinStakeBody>,
) -> Result<Json<MinStakeResponse>, ApiError> {
    state
        .coordinator
        .set_min_stake(body.caller, body.role, body.amount)
        .await
        .map_err(reject)?;
    Ok(Json(MinStakeResponse {
        role: body.role,
        amount: state.coordinator.registry().min_stake(body.role).await,
    }))
}

// ============================================================================
// Router
// ============================================================================

pub fn routes() -> Router<ApiState> {
    Router::new()
        // Nodes
        .route("/nodes", post(register_node))
        .route("/nodes/{identity}", get(get_node))
        // Ledger
        .route("/ledger/deposit", post(deposit))
        .route("/ledger/claim", post(claim))
        .route("/ledger/settle", post(settle))
        .route("/ledger/{identity}", get(get_account))
        // Admin
        .route("/admin/defaults", get(get_defaults).put(set_defaults))
        .route("/admin/min-stake", put(set_min_stake))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::clock::ManualClock;
    use crate::config::RegistryConfig;
    use crate::coordinator::RequestCoordinator;
    use crate::registry::DeterministicSeeds;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    const ADMIN: &str = "0x00000000000000000000000000000000000000fa";
    const ALICE: &str = "0x00000000000000000000000000000000000000a1";

    fn app() -> Router {
        let coordinator = RequestCoordinator::new(
            ADMIN.parse().unwrap(),
            RegistryConfig {
                min_stake_proposer: 5,
                min_stake_observer: 10,
                min_stake_auditor: 10,
            },
            ProtocolDefaults::default(),
            Arc::new(DeterministicSeeds::new([0u8; 32])),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        create_router(ApiState::new(Arc::new(coordinator)))
    }

    fn send(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let app = app();
        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/nodes",
                serde_json::json!({ "identity": ALICE, "role": "observer", "stake": 9 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/nodes",
                serde_json::json!({ "identity": ALICE, "role": "observer", "stake": 10 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri(format!("/nodes/{ALICE}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let node = json_body(response).await;
        assert_eq!(node["registered"], true);
        assert_eq!(node["role"], "observer");
    }

    #[tokio::test]
    async fn test_manual_settle() {
        let app = app();
        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/ledger/settle",
                serde_json::json!({
                    "caller": ALICE,
                    "request_id": 1,
                    "rep_targets": [ALICE],
                    "rep_deltas": [2]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/ledger/settle",
                serde_json::json!({
                    "caller": ADMIN,
                    "request_id": 1,
                    "payees": [ALICE],
                    "amounts": [5, 6]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing escrowed for request 1, so nothing can be paid out of it
        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/ledger/settle",
                serde_json::json!({
                    "caller": ADMIN,
                    "request_id": 1,
                    "payees": [ALICE],
                    "amounts": [5]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/ledger/settle",
                serde_json::json!({
                    "caller": ADMIN,
                    "request_id": 1,
                    "rep_targets": [ALICE],
                    "rep_deltas": [2]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/ledger/{ALICE}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let account = json_body(response).await;
        assert_eq!(account["reputation"], 2);
        assert_eq!(account["withdrawable"], 0);
    }

    #[tokio::test]
    async fn test_deposit_and_claim() {
        let app = app();
        let response = app
            .clone()
            .oneshot(send(
                "POST",
                "/ledger/deposit",
                serde_json::json!({ "identity": ALICE, "amount": 5 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["withdrawable"], 5);

        let response = app
            .clone()
            .oneshot(send("POST", "/ledger/claim", serde_json::json!({ "identity": ALICE })))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["amount"], 5);

        let response = app
            .oneshot(send("POST", "/ledger/claim", serde_json::json!({ "identity": ALICE })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_admin_defaults() {
        let app = app();
        let mut defaults = serde_json::to_value(ProtocolDefaults::default()).unwrap();
        defaults["lambda_x100"] = serde_json::json!(400);

        let response = app
            .clone()
            .oneshot(send(
                "PUT",
                "/admin/defaults",
                serde_json::json!({ "caller": ALICE, "defaults": defaults }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(send(
                "PUT",
                "/admin/defaults",
                serde_json::json!({ "caller": ADMIN, "defaults": defaults }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/admin/defaults").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["lambda_x100"], 400);

        let response = app
            .oneshot(send(
                "PUT",
                "/admin/min-stake",
                serde_json::json!({ "caller": ADMIN, "role": "auditor", "amount": 3 }),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["amount"], 3);
    }
}
