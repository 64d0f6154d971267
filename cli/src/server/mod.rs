//! HTTP query API and live WebSocket channel.
//!
//! ```text
//! GET    /health
//! GET    /ws                                  live channel
//! GET    /api/status
//! GET    /api/events/:address                 ?limit | ?startTime&endTime
//! GET    /api/blocks                          ?startBlock&endBlock
//! GET    /api/metrics/:address                ?timeRange=1h|24h|7d
//! POST   /api/contracts                       { address, abi }
//! GET    /api/transactions/:hash
//! POST   /api/replay/state                    { contractAddress, blockNumber, stateData }
//! GET    /api/replay/state/:address/:block
//! GET    /api/replay/diff/:address            ?from&to
//! POST   /api/replay/session                  { contractAddress, startBlock, endBlock }
//! GET    /api/replay/session/:id
//! DELETE /api/replay/session/:id
//! POST   /api/replay/session/:id/{forward,backward,reset,pause}
//! POST   /api/replay/session/:id/seek         ?block
//! POST   /api/replay/session/:id/play         ?speed
//! ```

mod live;
mod replay;
mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use chainpulse_core::{EventStore, LiveHub, PipelineMetrics};
use chainpulse_evm::ContractRegistry;
use chainpulse_replay::SessionRegistry;

/// Everything the handlers share.
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<ContractRegistry>,
    pub hub: Arc<LiveHub>,
    pub metrics: Arc<PipelineMetrics>,
    pub sessions: Arc<SessionRegistry>,
    pub started_at: Instant,
    /// Events sent to a live client when it subscribes to a contract.
    pub recent_events_on_subscribe: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<ContractRegistry>,
        hub: Arc<LiveHub>,
        metrics: Arc<PipelineMetrics>,
        recent_events_on_subscribe: usize,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(Arc::clone(&store)));
        Self {
            store,
            registry,
            hub,
            metrics,
            sessions,
            started_at: Instant::now(),
            recent_events_on_subscribe,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/status", get(routes::status))
        .route("/events/:address", get(routes::events))
        .route("/blocks", get(routes::blocks))
        .route("/metrics/:address", get(routes::metrics))
        .route("/contracts", post(routes::add_contract))
        .route("/transactions/:hash", get(routes::transaction))
        .route("/replay/state", post(routes::record_state))
        .route("/replay/state/:address/:block", get(routes::contract_state))
        .route("/replay/diff/:address", get(routes::state_diff))
        .route("/replay/session", post(replay::create))
        .route("/replay/session/:id", get(replay::view).delete(replay::close))
        .route("/replay/session/:id/forward", post(replay::forward))
        .route("/replay/session/:id/backward", post(replay::backward))
        .route("/replay/session/:id/reset", post(replay::reset))
        .route("/replay/session/:id/seek", post(replay::seek))
        .route("/replay/session/:id/play", post(replay::play))
        .route("/replay/session/:id/pause", post(replay::pause));

    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(live::ws_handler))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// `{ "error": message }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
