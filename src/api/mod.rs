//! Axum JSON API over the mirrored contract state and the bet ledger.
//!
//! Provides:
//!   GET|POST /api/sync               → run a reconciliation now
//!   GET  /api/status                 → game status and prize pool
//!   GET  /api/teams                  → team snapshot
//!   GET  /api/user_bets/:address     → one user's bets and total
//!   POST /api/record_bet             → append a client-reported bet
//!   POST /api/reset_database         → wipe everything
//!   GET  /api/stats                  → participant/bet counts and pool
//!   GET  /api/leaderboard?limit=N    → top bettors by total wei
//!   GET  /api/health                 → liveness, last chain contact, last sync
//!
//! Wei amounts are always sent as decimal strings; the `_eth` fields are a
//! lossy convenience for display.

use crate::ledger::{BetLedger, BetSubmission, LedgerError};
use crate::reconcile::{Reconciler, SyncError};
use crate::store::{InsertOutcome, Store, StoreError};

use alloy::primitives::utils::format_ether;
use alloy::primitives::U256;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub ledger: BetLedger,
    pub reconciler: Arc<Reconciler>,
}

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync", get(api_sync).post(api_sync))
        .route("/api/status", get(api_status))
        .route("/api/teams", get(api_teams))
        .route("/api/user_bets/:address", get(api_user_bets))
        .route("/api/record_bet", post(api_record_bet))
        .route("/api/reset_database", post(api_reset_database))
        .route("/api/stats", get(api_stats))
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/api/health", get(api_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    state: AppState,
    bind_addr: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    info!("api stopped");
    Ok(())
}

// --- Errors ---

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    ChainUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::ChainUnavailable(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "store error");
        ApiError::Internal(e.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::ChainUnavailable(e) => ApiError::ChainUnavailable(e.to_string()),
            SyncError::Persistence(e) => e.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Validation(m) => ApiError::BadRequest(m),
            LedgerError::Persistence(e) => e.into(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn to_eth(wei: U256) -> f64 {
    format_ether(wei).parse::<f64>().unwrap_or(0.0)
}

// --- Response bodies ---

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: u8,
    status_text: &'static str,
    total_prize_pool_wei: String,
    total_prize_pool_eth: f64,
    /// 0 when no winner has been selected.
    winning_team_id: u32,
}

#[derive(Debug, Serialize)]
struct TeamResponse {
    id: u32,
    name: String,
    total_bet_wei: String,
    total_bet_eth: f64,
    supporters: u64,
}

#[derive(Debug, Serialize)]
struct BetResponse {
    team_id: u32,
    amount_wei: String,
    amount_eth: f64,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserBetsResponse {
    total_bet_wei: String,
    total_bet_eth: f64,
    bets: Vec<BetResponse>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_unique_participants: usize,
    total_bets: u64,
    total_prize_pool_wei: String,
    total_prize_pool_eth: f64,
}

#[derive(Debug, Serialize)]
struct LeaderboardEntry {
    rank: usize,
    address: String,
    total_bet_wei: String,
    total_bet_eth: f64,
    bet_count: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    chain_connected: bool,
    last_sync: Option<String>,
}

// --- Request bodies ---

/// `teamId` and `amount` may arrive as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordBetRequest {
    user_address: Option<String>,
    team_id: Option<Value>,
    amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

fn team_id_field(value: Option<Value>) -> Result<Option<u32>, ApiError> {
    let invalid = || ApiError::BadRequest("teamId must be a non-negative integer".to_string());
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn amount_field(value: Option<Value>) -> Result<Option<String>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) if n.is_u64() => Ok(Some(n.to_string())),
        Some(_) => Err(ApiError::BadRequest(
            "amount must be an integer wei string".to_string(),
        )),
    }
}

// --- Handlers ---

async fn api_sync(State(state): State<AppState>) -> ApiResult<Value> {
    match state.reconciler.reconcile().await {
        Ok(summary) => Ok(Json(json!({
            "message": "Synced successfully",
            "status": summary.status.code(),
        }))),
        Err(e) => {
            warn!(error = %e, "manual sync failed");
            Err(e.into())
        }
    }
}

async fn api_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let gs = state.store.global_state().await?;
    Ok(Json(StatusResponse {
        status: gs.status.code(),
        status_text: gs.status.as_str(),
        total_prize_pool_wei: gs.total_prize_pool.to_string(),
        total_prize_pool_eth: to_eth(gs.total_prize_pool),
        winning_team_id: gs.winning_team_id.unwrap_or(0),
    }))
}

async fn api_teams(State(state): State<AppState>) -> ApiResult<Vec<TeamResponse>> {
    let teams = state.store.teams().await?;
    Ok(Json(
        teams
            .into_iter()
            .map(|t| TeamResponse {
                id: t.id,
                name: t.name,
                total_bet_wei: t.total_bet_amount.to_string(),
                total_bet_eth: to_eth(t.total_bet_amount),
                supporters: t.supporter_count,
            })
            .collect(),
    ))
}

async fn api_user_bets(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<UserBetsResponse> {
    let user = state.ledger.list_bets_for(&address).await?;
    Ok(Json(UserBetsResponse {
        total_bet_wei: user.total_wei.to_string(),
        total_bet_eth: to_eth(user.total_wei),
        bets: user
            .bets
            .into_iter()
            .map(|b| BetResponse {
                team_id: b.team_id,
                amount_wei: b.amount_wei.to_string(),
                amount_eth: to_eth(b.amount_wei),
                timestamp: b.timestamp.to_rfc3339(),
                tx_hash: b.provenance.map(|p| p.tx_hash),
            })
            .collect(),
    }))
}

async fn api_record_bet(
    State(state): State<AppState>,
    payload: Result<Json<RecordBetRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let submission = BetSubmission {
        user_address: req.user_address,
        team_id: team_id_field(req.team_id)?,
        amount_wei: amount_field(req.amount)?,
        timestamp: None,
        provenance: None,
    };

    let outcome = state.ledger.record_bet(submission).await?;
    let message = match outcome {
        InsertOutcome::Inserted(_) => "Bet recorded successfully",
        InsertOutcome::Duplicate(_) => "Bet already recorded",
    };
    Ok(Json(json!({ "message": message, "bet_id": outcome.id() })))
}

async fn api_reset_database(State(state): State<AppState>) -> ApiResult<Value> {
    state.reconciler.reset_all().await?;
    Ok(Json(json!({ "message": "Database reset successfully" })))
}

async fn api_stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let participants = state.store.bettor_totals().await?.len();
    let total_bets = state.store.bet_count().await?;
    let pool = state.store.global_state().await?.total_prize_pool;
    Ok(Json(StatsResponse {
        total_unique_participants: participants,
        total_bets,
        total_prize_pool_wei: pool.to_string(),
        total_prize_pool_eth: to_eth(pool),
    }))
}

async fn api_leaderboard(
    State(state): State<AppState>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);

    // Totals come back ordered by address; a stable sort keeps that for ties.
    let mut totals = state.store.bettor_totals().await?;
    totals.sort_by(|a, b| b.total_wei.cmp(&a.total_wei));

    Ok(Json(
        totals
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, t)| LeaderboardEntry {
                rank: i + 1,
                address: t.user_address,
                total_bet_wei: t.total_wei.to_string(),
                total_bet_eth: to_eth(t.total_wei),
                bet_count: t.bet_count,
            })
            .collect(),
    ))
}

/// Reports the outcome of the last chain contact made by a sync or poll.
async fn api_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        chain_connected: state.reconciler.chain_connected(),
        last_sync: state.reconciler.last_success().await.map(|t| t.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{team, MockChain, MockState};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const ONE_ETH: &str = "1000000000000000000";

    struct TestApp {
        chain: Arc<MockChain>,
        store: Store,
        router: Router,
    }

    impl TestApp {
        async fn new(state: MockState) -> Self {
            let chain = Arc::new(MockChain::new(state));
            let store = Store::in_memory().await.unwrap();
            let reconciler = Arc::new(Reconciler::new(chain.clone(), store.clone()));
            let router = build_router(AppState {
                store: store.clone(),
                ledger: BetLedger::new(store.clone()),
                reconciler,
            });
            Self {
                chain,
                store,
                router,
            }
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    fn finished_chain() -> MockState {
        MockState {
            status_code: 2,
            winning_team_id: 3,
            total_prize_pool: U256::from(10u64).pow(U256::from(18u64)) * U256::from(3u64),
            teams: vec![team(1, "Brazil", 1, 1), team(3, "Argentina", 2, 2)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_status_on_empty_database() {
        let app = TestApp::new(MockState::default()).await;
        let (code, body) = app.get("/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], 0);
        assert_eq!(body["status_text"], "Open");
        assert_eq!(body["total_prize_pool_wei"], "0");
        assert_eq!(body["winning_team_id"], 0);
    }

    #[tokio::test]
    async fn test_status_text_for_every_code() {
        let app = TestApp::new(MockState::default()).await;
        for (code, text) in [(0, "Open"), (1, "Stopped"), (2, "Finished"), (3, "Refunding")] {
            app.chain.update(|s| s.status_code = code);
            let (status, _) = app.post("/api/sync", json!({})).await;
            assert_eq!(status, StatusCode::OK);
            let (_, body) = app.get("/api/status").await;
            assert_eq!(body["status"], code);
            assert_eq!(body["status_text"], text);
        }
    }

    #[tokio::test]
    async fn test_corrupt_status_is_a_clean_error() {
        let app = TestApp::new(MockState::default()).await;
        sqlx::query("UPDATE game_state SET status = 7")
            .execute(app.store.pool())
            .await
            .unwrap();
        let (code, body) = app.get("/api/status").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_sync_then_read_snapshot() {
        let app = TestApp::new(finished_chain()).await;
        let (code, body) = app.get("/api/sync").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["message"], "Synced successfully");
        assert_eq!(body["status"], 2);

        let (_, status) = app.get("/api/status").await;
        assert_eq!(status["winning_team_id"], 3);
        assert_eq!(status["total_prize_pool_wei"], "3000000000000000000");
        assert_eq!(status["total_prize_pool_eth"], 3.0);

        let (_, teams) = app.get("/api/teams").await;
        let teams = teams.as_array().unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[1]["name"], "Argentina");
        assert_eq!(teams[1]["total_bet_wei"], "2");
        assert_eq!(teams[1]["supporters"], 2);
    }

    #[tokio::test]
    async fn test_sync_reports_unreachable_chain() {
        let app = TestApp::new(MockState {
            connected: false,
            ..Default::default()
        })
        .await;
        let (code, body) = app.post("/api/sync", json!({})).await;
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("chain unavailable"));

        let (_, health) = app.get("/api/health").await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["chain_connected"], false);
        assert_eq!(health["last_sync"], Value::Null);
    }

    #[tokio::test]
    async fn test_record_bet_then_list() {
        let app = TestApp::new(MockState::default()).await;
        let (code, body) = app
            .post(
                "/api/record_bet",
                json!({ "userAddress": "0xabc", "teamId": 1, "amount": ONE_ETH }),
            )
            .await;
        assert_eq!(code, StatusCode::OK);
        let bet_id = body["bet_id"].as_i64().unwrap();
        assert!(bet_id > 0);

        let (code, body) = app.get("/api/user_bets/0xabc").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["total_bet_wei"], ONE_ETH);
        assert_eq!(body["total_bet_eth"], 1.0);
        assert_eq!(body["bets"][0]["amount_wei"], ONE_ETH);
        assert_eq!(body["bets"][0]["team_id"], 1);
    }

    #[tokio::test]
    async fn test_record_bet_rejects_bad_input() {
        let app = TestApp::new(MockState::default()).await;
        for body in [
            json!({ "teamId": 1, "amount": ONE_ETH }),
            json!({ "userAddress": "0xabc", "amount": ONE_ETH }),
            json!({ "userAddress": "0xabc", "teamId": 1 }),
            json!({ "userAddress": "0xabc", "teamId": 1, "amount": "1.5" }),
            json!({ "userAddress": "0xabc", "teamId": -1, "amount": ONE_ETH }),
            json!({ "userAddress": "not-an-address", "teamId": 1, "amount": ONE_ETH }),
        ] {
            let (code, resp) = app.post("/api/record_bet", body.clone()).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "accepted {body}");
            assert!(resp["error"].is_string());
        }

        let resp = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/record_bet")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.store.bet_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_leaderboard() {
        let app = TestApp::new(finished_chain()).await;
        app.get("/api/sync").await;
        for (user, amount) in [("0xbbb", "5"), ("0xaaa", "5"), ("0xccc", "9"), ("0xaaa", "1")] {
            let (code, _) = app
                .post(
                    "/api/record_bet",
                    json!({ "userAddress": user, "teamId": "1", "amount": amount }),
                )
                .await;
            assert_eq!(code, StatusCode::OK);
        }

        let (_, stats) = app.get("/api/stats").await;
        assert_eq!(stats["total_unique_participants"], 3);
        assert_eq!(stats["total_bets"], 4);
        assert_eq!(stats["total_prize_pool_wei"], "3000000000000000000");

        let (_, board) = app.get("/api/leaderboard").await;
        let addresses: Vec<&str> = board
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["address"].as_str().unwrap())
            .collect();
        assert_eq!(addresses, vec!["0xccc", "0xaaa", "0xbbb"]);
        assert_eq!(board[0]["rank"], 1);
        assert_eq!(board[1]["total_bet_wei"], "6");
        assert_eq!(board[1]["bet_count"], 2);
        assert_eq!(board[2]["bet_count"], 1);

        let (_, top) = app.get("/api/leaderboard?limit=1").await;
        assert_eq!(top.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_rejects_malformed_limit_as_json() {
        let app = TestApp::new(MockState::default()).await;
        for uri in ["/api/leaderboard?limit=abc", "/api/leaderboard?limit=-3"] {
            let (code, body) = app.get(uri).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string(), "{uri} gave {body}");
        }
    }

    #[tokio::test]
    async fn test_health_reports_last_contact_without_calling_chain() {
        let app = TestApp::new(finished_chain()).await;
        let (_, health) = app.get("/api/health").await;
        assert_eq!(health["chain_connected"], false);

        app.get("/api/sync").await;
        let (_, health) = app.get("/api/health").await;
        assert_eq!(health["chain_connected"], true);
        assert!(health["last_sync"].is_string());

        // A silent node must not stall the health check.
        app.chain.update(|s| s.hung = true);
        let (code, health) = tokio::time::timeout(Duration::from_secs(1), app.get("/api/health"))
            .await
            .expect("health check waited on the chain");
        assert_eq!(code, StatusCode::OK);
        assert_eq!(health["chain_connected"], true);

        app.chain.update(|s| {
            s.hung = false;
            s.connected = false;
        });
        app.get("/api/sync").await;
        let (_, health) = app.get("/api/health").await;
        assert_eq!(health["chain_connected"], false);
    }

    #[tokio::test]
    async fn test_reset_database() {
        let app = TestApp::new(finished_chain()).await;
        app.get("/api/sync").await;
        app.post(
            "/api/record_bet",
            json!({ "userAddress": "0xabc", "teamId": 1, "amount": "1" }),
        )
        .await;

        let (code, body) = app.post("/api/reset_database", json!({})).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["message"], "Database reset successfully");

        let (_, status) = app.get("/api/status").await;
        assert_eq!(status["status"], 0);
        assert_eq!(status["winning_team_id"], 0);
        let (_, teams) = app.get("/api/teams").await;
        assert!(teams.as_array().unwrap().is_empty());
        let (_, bets) = app.get("/api/user_bets/0xabc").await;
        assert!(bets["bets"].as_array().unwrap().is_empty());
    }
}
