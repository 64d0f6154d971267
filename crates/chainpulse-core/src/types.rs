//! Data model for blocks, decoded events, transactions and contract snapshots.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PulseError;

// ─── Addresses ────────────────────────────────────────────────────────────────

/// Validate a `0x`-prefixed 20-byte hex address and return it lowercased.
///
/// Every address that enters the system goes through this function, so
/// storage keys and live topics compare case-insensitively by construction.
pub fn normalize_address(address: &str) -> Result<String, PulseError> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| PulseError::InvalidInput(format!("address '{address}' must start with 0x")))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PulseError::InvalidInput(format!(
            "address '{address}' is not 20 bytes of hex"
        )));
    }
    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block header as persisted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction_count: u32,
    pub gas_used: u64,
    pub gas_limit: u64,
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// An undecoded log entry as returned by the chain connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract, lowercased.
    pub address: String,
    /// `topics[0]` is the event selector for non-anonymous events.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed arguments (`0x…`).
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: Option<String>,
    pub log_index: Option<u64>,
    /// Set when the node reports the log as removed by a reorg.
    #[serde(default)]
    pub removed: bool,
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Store-assigned id; `None` until persisted.
    pub id: Option<i64>,
    pub contract_address: String,
    pub event_name: String,
    pub block_number: u64,
    pub transaction_hash: Option<String>,
    /// Decoded arguments in declaration order.
    pub args: Vec<Value>,
    /// Gas used by the emitting transaction, when its receipt was available.
    pub gas_used: Option<u64>,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
    /// Ingestion wall-clock time.
    pub created_at: DateTime<Utc>,
}

// ─── Receipt / Transaction ────────────────────────────────────────────────────

/// The subset of a transaction receipt the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: Option<String>,
    pub gas_used: u64,
    pub effective_gas_price: Option<u64>,
    /// `1` on success, `0` on revert.
    pub status: u8,
}

/// A materialized transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: Option<String>,
    /// Wei value as a decimal string; receipts do not carry it.
    pub value: Option<String>,
    pub gas_used: u64,
    pub gas_price: Option<u64>,
    pub status: u8,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Build a transaction row from a receipt and the containing block's timestamp.
    pub fn from_receipt(receipt: &Receipt, timestamp: DateTime<Utc>) -> Self {
        Self {
            hash: receipt.transaction_hash.clone(),
            block_number: receipt.block_number,
            from: receipt.from.clone(),
            to: receipt.to.clone(),
            value: None,
            gas_used: receipt.gas_used,
            gas_price: receipt.effective_gas_price,
            status: receipt.status,
            timestamp,
        }
    }
}

// ─── ContractStateSnapshot ────────────────────────────────────────────────────

/// Opaque key/value state of a contract at a given block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractStateSnapshot {
    pub contract_address: String,
    pub block_number: u64,
    pub state_data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

// ─── TimeWindow ───────────────────────────────────────────────────────────────

/// Lookback window for aggregate metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[default]
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastHour => "1h",
            Self::LastDay => "24h",
            Self::LastWeek => "7d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::LastHour => Duration::hours(1),
            Self::LastDay => Duration::hours(24),
            Self::LastWeek => Duration::days(7),
        }
    }

    /// Parse a window label, falling back to one hour for anything unrecognized.
    pub fn parse_or_default(label: Option<&str>) -> Self {
        label.and_then(|l| l.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for TimeWindow {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::LastHour),
            "24h" => Ok(Self::LastDay),
            "7d" => Ok(Self::LastWeek),
            other => Err(PulseError::InvalidInput(format!("unknown time window '{other}'"))),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── EventNameStats ───────────────────────────────────────────────────────────

/// Per-event-name aggregate over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNameStats {
    pub event_name: String,
    pub event_count: u64,
    pub blocks_with_events: u64,
    /// `None` when no event in the group has a known gas figure.
    pub avg_gas_used: Option<f64>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_valid_address() {
        let addr = normalize_address("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        assert_eq!(addr, "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn normalize_rejects_bad_addresses() {
        assert!(normalize_address("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn time_window_parsing() {
        assert_eq!("24h".parse::<TimeWindow>().unwrap(), TimeWindow::LastDay);
        assert!("30d".parse::<TimeWindow>().is_err());
        assert_eq!(TimeWindow::parse_or_default(Some("30d")), TimeWindow::LastHour);
        assert_eq!(TimeWindow::parse_or_default(None), TimeWindow::LastHour);
        assert_eq!(TimeWindow::LastWeek.duration(), Duration::days(7));
    }

    #[test]
    fn event_serializes_camel_case() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let event = Event {
            id: Some(1),
            contract_address: "0xabc".into(),
            event_name: "Transfer".into(),
            block_number: 100,
            transaction_hash: Some("0xt1".into()),
            args: vec![Value::String("1000".into())],
            gas_used: Some(21_000),
            timestamp: ts,
            created_at: ts,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventName"], "Transfer");
        assert_eq!(json["blockNumber"], 100);
        assert_eq!(json["gasUsed"], 21_000);
        assert_eq!(json["args"][0], "1000");
    }

    #[test]
    fn transaction_from_receipt() {
        let receipt = Receipt {
            transaction_hash: "0xt1".into(),
            block_number: 5,
            from: "0xfrom".into(),
            to: None,
            gas_used: 50_000,
            effective_gas_price: Some(7),
            status: 1,
        };
        let tx = Transaction::from_receipt(&receipt, Utc::now());
        assert_eq!(tx.hash, "0xt1");
        assert_eq!(tx.gas_price, Some(7));
        assert!(tx.to.is_none());
        assert!(tx.value.is_none());
    }
}
