//! JSON-RPC 2.0 wire types and EVM response parsing.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use chainpulse_core::types::{Block, RawLog, Receipt};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// JSON-RPC request ID: a string, a number or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value (`null` when absent), or the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Transport-level failures of a single call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

fn hex_field(v: &Value, key: &str) -> Option<u64> {
    parse_hex_u64(v.get(key)?.as_str()?)
}

/// Format a block number as a JSON-RPC quantity.
pub fn to_hex_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Convert an `eth_getBlockByNumber` result into a [`Block`].
pub fn block_from_json(v: &Value) -> Option<Block> {
    let secs = hex_field(v, "timestamp")?;
    Some(Block {
        block_number: hex_field(v, "number")?,
        timestamp: DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)?,
        transaction_count: v["transactions"]
            .as_array()
            .map(|a| a.len() as u32)
            .unwrap_or(0),
        gas_used: hex_field(v, "gasUsed").unwrap_or(0),
        gas_limit: hex_field(v, "gasLimit").unwrap_or(0),
    })
}

/// Convert an `eth_getTransactionReceipt` result into a [`Receipt`].
pub fn receipt_from_json(v: &Value) -> Option<Receipt> {
    Some(Receipt {
        transaction_hash: v["transactionHash"].as_str()?.to_ascii_lowercase(),
        block_number: hex_field(v, "blockNumber")?,
        from: v["from"].as_str()?.to_ascii_lowercase(),
        to: v["to"].as_str().map(str::to_ascii_lowercase),
        gas_used: hex_field(v, "gasUsed")?,
        effective_gas_price: hex_field(v, "effectiveGasPrice"),
        // Absent on pre-Byzantium receipts; treated as success.
        status: u8::from(hex_field(v, "status").map_or(true, |s| s != 0)),
    })
}

/// A log as returned by `eth_getLogs`, before quantity parsing.
#[derive(Debug, Clone, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    transaction_hash: Option<String>,
    #[serde(rename = "logIndex")]
    log_index: Option<String>,
    removed: Option<bool>,
}

/// Convert one `eth_getLogs` entry into a [`RawLog`].
pub fn log_from_json(v: &Value) -> Option<RawLog> {
    let log: RpcLog = serde_json::from_value(v.clone()).ok()?;
    Some(RawLog {
        address: log.address.to_ascii_lowercase(),
        topics: log.topics.iter().map(|t| t.to_ascii_lowercase()).collect(),
        data: log.data,
        block_number: parse_hex_u64(log.block_number.as_deref()?)?,
        transaction_hash: log.transaction_hash.map(|h| h.to_ascii_lowercase()),
        log_index: log.log_index.as_deref().and_then(parse_hex_u64),
        removed: log.removed.unwrap_or(false),
    })
}

/// Extract the block number from a `newHeads` notification payload.
pub fn head_number(v: &Value) -> Option<u64> {
    hex_field(v, "number")
}
