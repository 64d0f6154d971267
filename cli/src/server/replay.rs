//! Replay session handlers. Each session owns one replay engine.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use chainpulse_core::PulseError;
use chainpulse_replay::{ReplayEngine, ReplayView};

use super::routes::{block_param, contract_param};
use super::{ApiError, ApiResult, SharedState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    contract_address: Option<String>,
    start_block: Option<u64>,
    end_block: Option<u64>,
}

pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (Some(address), Some(start), Some(end)) =
        (body.contract_address, body.start_block, body.end_block)
    else {
        return Err(ApiError::bad_request(
            "contractAddress, startBlock and endBlock are required",
        ));
    };
    let contract = contract_param(&address)?;

    match state.sessions.create(&contract, start, end).await {
        Ok((id, view)) => Ok((
            StatusCode::CREATED,
            Json(json!({ "sessionId": id, "view": view })),
        )),
        Err(e @ PulseError::EmptyRange { .. }) => Err(ApiError::not_found(e.to_string())),
        Err(e @ PulseError::InvalidInput(_)) => Err(ApiError::bad_request(e.to_string())),
        Err(e) => {
            error!(contract = %contract, start, end, error = %e, "replay load failed");
            Err(ApiError::internal("Failed to create replay session"))
        }
    }
}

pub async fn view(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    current_view(&engine)
}

pub async fn close(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    if state.sessions.remove(&id) {
        Ok(Json(json!({ "message": "Replay session closed" })))
    } else {
        Err(ApiError::not_found("Replay session not found"))
    }
}

pub async fn forward(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    engine.step_forward().map_err(engine_error)?;
    current_view(&engine)
}

pub async fn backward(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    engine.step_backward().map_err(engine_error)?;
    current_view(&engine)
}

pub async fn reset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    engine.reset().map_err(engine_error)?;
    current_view(&engine)
}

pub async fn seek(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    let Some(block) = query.get("block") else {
        return Err(ApiError::bad_request("block is required"));
    };
    engine
        .seek(block_param("block", block)?)
        .map_err(engine_error)?;
    current_view(&engine)
}

pub async fn play(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    let speed = match query.get("speed") {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| ApiError::bad_request("speed must be a number"))?,
        None => 1.0,
    };
    engine.play(speed).map_err(engine_error)?;
    current_view(&engine)
}

pub async fn pause(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayView>> {
    let engine = session(&state, &id)?;
    engine.pause();
    current_view(&engine)
}

fn session_id(raw: &str) -> ApiResult<Uuid> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Replay session not found"))
}

fn session(state: &SharedState, raw: &str) -> ApiResult<Arc<ReplayEngine>> {
    state
        .sessions
        .get(&session_id(raw)?)
        .ok_or_else(|| ApiError::not_found("Replay session not found"))
}

fn current_view(engine: &ReplayEngine) -> ApiResult<Json<ReplayView>> {
    engine
        .view()
        .map(Json)
        .ok_or_else(|| ApiError::internal("Replay session has no loaded range"))
}

fn engine_error(e: PulseError) -> ApiError {
    match e {
        PulseError::InvalidInput(msg) => ApiError::bad_request(msg),
        other => ApiError::internal(other.to_string()),
    }
}
