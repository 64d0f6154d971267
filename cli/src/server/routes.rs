//! REST handlers for events, blocks, metrics, contracts and snapshots.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use chainpulse_core::{normalize_address, ContractStateSnapshot, TimeWindow};
use chainpulse_replay::diff_snapshots;

use super::{ApiError, ApiResult, SharedState};

const DEFAULT_EVENT_LIMIT: usize = 50;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "timestamp": Utc::now() }))
}

pub async fn status(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "metrics": state.metrics.snapshot(),
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    limit: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

pub async fn events(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let contract = contract_param(&address)?;

    let result = match (&query.start_time, &query.end_time) {
        (Some(start), Some(end)) => {
            let start = time_param("startTime", start)?;
            let end = time_param("endTime", end)?;
            state
                .store
                .get_events_by_time_range(&contract, start, end)
                .await
        }
        _ => {
            let limit = match &query.limit {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| ApiError::bad_request("limit must be a non-negative integer"))?,
                None => DEFAULT_EVENT_LIMIT,
            };
            state.store.get_recent_events(&contract, limit).await
        }
    };

    let events = result.map_err(|e| {
        error!(contract = %contract, error = %e, "event query failed");
        ApiError::internal("Failed to fetch events")
    })?;
    Ok(Json(json!({ "events": events })))
}

pub async fn blocks(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let (Some(start), Some(end)) = (query.get("startBlock"), query.get("endBlock")) else {
        return Err(ApiError::bad_request("startBlock and endBlock are required"));
    };
    let start = block_param("startBlock", start)?;
    let end = block_param("endBlock", end)?;

    let blocks = state
        .store
        .get_blocks_by_range(start, end)
        .await
        .map_err(|e| {
            error!(start, end, error = %e, "block query failed");
            ApiError::internal("Failed to fetch blocks")
        })?;
    Ok(Json(json!({ "blocks": blocks })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    time_range: Option<String>,
}

pub async fn metrics(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<Json<Value>> {
    let contract = contract_param(&address)?;
    let window = TimeWindow::parse_or_default(query.time_range.as_deref());

    let contract_metrics = state
        .store
        .get_metrics(&contract, window)
        .await
        .map_err(|e| {
            error!(contract = %contract, window = %window, error = %e, "metrics query failed");
            ApiError::internal("Failed to fetch metrics")
        })?;
    Ok(Json(json!({
        "contractMetrics": contract_metrics,
        "systemMetrics": state.metrics.snapshot(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct AddContractBody {
    address: Option<String>,
    abi: Option<Value>,
}

pub async fn add_contract(
    State(state): State<SharedState>,
    Json(body): Json<AddContractBody>,
) -> ApiResult<Json<Value>> {
    let (Some(address), Some(abi)) = (body.address, body.abi) else {
        return Err(ApiError::bad_request("address and abi are required"));
    };

    match state.registry.watch_value(&address, &abi) {
        Ok(address) => {
            info!(contract = %address, "contract added over HTTP");
            Ok(Json(json!({
                "message": "Contract added successfully",
                "address": address,
            })))
        }
        Err(e) => {
            warn!(contract = %address, error = %e, "contract registration rejected");
            Err(ApiError::internal("Failed to add contract"))
        }
    }
}

pub async fn transaction(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<Value>> {
    let hash = hash.to_ascii_lowercase();
    let tx = state.store.get_transaction(&hash).await.map_err(|e| {
        error!(tx = %hash, error = %e, "transaction query failed");
        ApiError::internal("Failed to fetch transaction")
    })?;
    match tx {
        Some(tx) => Ok(Json(json!(tx))),
        None => Err(ApiError::not_found("Transaction not found")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStateBody {
    contract_address: Option<String>,
    block_number: Option<u64>,
    #[serde(default)]
    state_data: Map<String, Value>,
    timestamp: Option<DateTime<Utc>>,
}

pub async fn record_state(
    State(state): State<SharedState>,
    Json(body): Json<RecordStateBody>,
) -> ApiResult<(StatusCode, Json<ContractStateSnapshot>)> {
    let (Some(address), Some(block_number)) = (body.contract_address, body.block_number) else {
        return Err(ApiError::bad_request("contractAddress and blockNumber are required"));
    };
    let snapshot = ContractStateSnapshot {
        contract_address: contract_param(&address)?,
        block_number,
        state_data: body.state_data,
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };

    state.store.store_snapshot(&snapshot).await.map_err(|e| {
        error!(contract = %snapshot.contract_address, block = block_number, error = %e, "snapshot store failed");
        ApiError::internal("Failed to record state")
    })?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn contract_state(
    State(state): State<SharedState>,
    Path((address, block)): Path<(String, String)>,
) -> ApiResult<Json<ContractStateSnapshot>> {
    let contract = contract_param(&address)?;
    let block = block_param("blockNumber", &block)?;

    let snapshot = state
        .store
        .get_snapshot(&contract, block)
        .await
        .map_err(|e| {
            error!(contract = %contract, block, error = %e, "snapshot query failed");
            ApiError::internal("Failed to fetch contract state")
        })?;
    snapshot
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Contract state not found"))
}

pub async fn state_diff(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let (Some(from), Some(to)) = (query.get("from"), query.get("to")) else {
        return Err(ApiError::bad_request("from and to are required"));
    };
    let contract = contract_param(&address)?;
    let from = block_param("from", from)?;
    let to = block_param("to", to)?;

    let diff = diff_snapshots(state.store.as_ref(), &contract, from, to)
        .await
        .map_err(|e| {
            error!(contract = %contract, from, to, error = %e, "state diff failed");
            ApiError::internal("Failed to compute state diff")
        })?;
    Ok(Json(json!(diff)))
}

// ─── Parameter parsing ────────────────────────────────────────────────────────

pub(super) fn contract_param(address: &str) -> ApiResult<String> {
    normalize_address(address).map_err(|_| ApiError::bad_request("invalid contract address"))
}

pub(super) fn block_param(name: &str, raw: &str) -> ApiResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{name} must be a block number")))
}

fn time_param(name: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::bad_request(format!("{name} must be an RFC 3339 timestamp")))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{call, state};
    use axum::http::StatusCode;
    use chainpulse_core::{Block, Event};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    const TOKEN: &str = "0x1111111111111111111111111111111111111111";
    const TRANSFER_ABI: &str = r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}]"#;

    fn event(name: &str, block: u64, minutes_ago: i64) -> Event {
        let ts = Utc::now() - Duration::minutes(minutes_ago);
        Event {
            id: None,
            contract_address: TOKEN.into(),
            event_name: name.into(),
            block_number: block,
            transaction_hash: None,
            args: vec![],
            gas_used: Some(40_000),
            timestamp: ts,
            created_at: ts,
        }
    }

    #[tokio::test]
    async fn health_and_status() {
        let state = state();
        let (status, body) = call(&state, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");

        let (status, body) = call(&state, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["metrics"]["totalEvents"], 0);
        assert!(body["uptime"].is_number());
    }

    #[tokio::test]
    async fn events_by_limit_and_time_range() {
        let state = state();
        for (i, minutes) in [30, 20, 10].into_iter().enumerate() {
            state.store.store_event(&event("Transfer", 100 + i as u64, minutes)).await.unwrap();
        }

        let (status, body) = call(&state, "GET", &format!("/api/events/{TOKEN}?limit=2"), None).await;
        assert_eq!(status, StatusCode::OK);
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["blockNumber"], 102);

        let start = (Utc::now() - Duration::minutes(25)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let end = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let (status, body) = call(
            &state,
            "GET",
            &format!("/api/events/{TOKEN}?startTime={start}&endTime={end}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let blocks: Vec<u64> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["blockNumber"].as_u64().unwrap())
            .collect();
        assert_eq!(blocks, vec![101, 102]);
    }

    #[tokio::test]
    async fn events_rejects_malformed_params() {
        let state = state();
        let (status, _) = call(&state, "GET", &format!("/api/events/{TOKEN}?limit=many"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = call(&state, "GET", &format!("/api/events/{TOKEN}?startTime=yesterday&endTime=now"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        let (status, _) = call(&state, "GET", "/api/events/0x1234", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blocks_require_both_bounds() {
        let state = state();
        for n in [5u64, 6, 7] {
            state
                .store
                .store_block(&Block {
                    block_number: n,
                    timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                    transaction_count: 0,
                    gas_used: 0,
                    gas_limit: 0,
                })
                .await
                .unwrap();
        }

        let (status, body) = call(&state, "GET", "/api/blocks?startBlock=5", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "startBlock and endBlock are required");

        let (status, body) = call(&state, "GET", "/api/blocks?startBlock=6&endBlock=7", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocks"].as_array().unwrap().len(), 2);
        assert_eq!(body["blocks"][0]["blockNumber"], 6);
    }

    #[tokio::test]
    async fn metrics_defaults_to_one_hour() {
        let state = state();
        let (status, body) = call(&state, "GET", &format!("/api/metrics/{TOKEN}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contractMetrics"], json!([]));
        assert_eq!(body["systemMetrics"]["errorCount"], 0);

        state.store.store_event(&event("Transfer", 1, 5)).await.unwrap();
        state.store.store_event(&event("Approval", 1, 120)).await.unwrap();

        let (_, body) = call(&state, "GET", &format!("/api/metrics/{TOKEN}?timeRange=bogus"), None).await;
        let rows = body["contractMetrics"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["eventName"], "Transfer");

        let (_, body) = call(&state, "GET", &format!("/api/metrics/{TOKEN}?timeRange=24h"), None).await;
        assert_eq!(body["contractMetrics"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn add_contract_validates_and_registers() {
        let state = state();
        let (status, body) = call(&state, "POST", "/api/contracts", Some(json!({ "address": TOKEN }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "address and abi are required");

        let (status, body) = call(
            &state,
            "POST",
            "/api/contracts",
            Some(json!({ "address": TOKEN, "abi": "not an abi" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to add contract");

        let (status, body) = call(
            &state,
            "POST",
            "/api/contracts",
            Some(json!({ "address": TOKEN, "abi": TRANSFER_ABI })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Contract added successfully");
        assert_eq!(body["address"], TOKEN);
        assert!(state.registry.is_watched(TOKEN));
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let state = state();
        let (status, body) = call(&state, "GET", &format!("/api/transactions/0x{}", "ab".repeat(32)), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Transaction not found");
    }

    #[tokio::test]
    async fn record_state_then_diff() {
        let state = state();
        for (block, supply) in [(10u64, "100"), (20, "150")] {
            let (status, _) = call(
                &state,
                "POST",
                "/api/replay/state",
                Some(json!({
                    "contractAddress": TOKEN,
                    "blockNumber": block,
                    "stateData": { "totalSupply": supply }
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = call(&state, "GET", &format!("/api/replay/state/{TOKEN}/10"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stateData"]["totalSupply"], "100");

        let (status, _) = call(&state, "GET", &format!("/api/replay/state/{TOKEN}/11"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&state, "GET", &format!("/api/replay/diff/{TOKEN}?from=10&to=20"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changes"][0]["kind"], "modified");
        assert_eq!(body["changes"][0]["after"], "150");

        let (status, body) = call(&state, "GET", &format!("/api/replay/diff/{TOKEN}?from=10&to=30"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["toState"], "unknown");

        let (status, _) = call(&state, "GET", &format!("/api/replay/diff/{TOKEN}?from=10"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
