//! Per-contract event decoding from a JSON ABI.
//!
//! # EVM log layout
//! - `topics[0]` is the keccak256 selector of the event signature.
//! - Indexed parameters occupy `topics[1..]`. Value types are stored padded
//!   to 32 bytes and can be recovered; reference types (string, bytes,
//!   arrays, tuples) are stored as their keccak256 hash, which is returned
//!   as `0x`-hex.
//! - Non-indexed parameters are ABI-encoded together in `data`.

use std::collections::HashMap;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::JsonAbi;
use alloy_primitives::B256;
use serde_json::Value;
use tracing::debug;

use chainpulse_core::error::PulseError;
use chainpulse_core::types::RawLog;

use crate::normalizer;

/// A log matched and decoded against a contract's interface.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub event_name: String,
    /// Arguments in declaration order.
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
struct EventParam {
    indexed: bool,
    ty: DynSolType,
}

#[derive(Debug, Clone)]
struct EventSpec {
    name: String,
    params: Vec<EventParam>,
}

impl EventSpec {
    fn indexed_count(&self) -> usize {
        self.params.iter().filter(|p| p.indexed).count()
    }
}

/// Decoder for the events of one contract interface.
#[derive(Debug, Clone)]
pub struct ContractDecoder {
    address: String,
    events: HashMap<B256, EventSpec>,
}

impl ContractDecoder {
    /// Build a decoder from ABI JSON text.
    pub fn from_abi_json(address: &str, abi_json: &str) -> Result<Self, PulseError> {
        let abi: JsonAbi = serde_json::from_str(abi_json).map_err(|e| invalid(address, e))?;
        Self::from_abi(address, &abi)
    }

    /// Build a decoder from an already-parsed JSON value.
    ///
    /// Accepts either the ABI array itself or a string containing ABI JSON.
    pub fn from_abi_value(address: &str, abi: &Value) -> Result<Self, PulseError> {
        match abi {
            Value::String(text) => Self::from_abi_json(address, text),
            other => {
                let abi: JsonAbi =
                    serde_json::from_value(other.clone()).map_err(|e| invalid(address, e))?;
                Self::from_abi(address, &abi)
            }
        }
    }

    /// Build a decoder from a parsed ABI. Anonymous events are skipped since
    /// they carry no selector to match on.
    pub fn from_abi(address: &str, abi: &JsonAbi) -> Result<Self, PulseError> {
        let mut events = HashMap::new();
        for event in abi.events() {
            if event.anonymous {
                continue;
            }
            let params = event
                .inputs
                .iter()
                .map(|input| -> Result<EventParam, PulseError> {
                    let ty: DynSolType = input.resolve().map_err(|e| {
                        invalid(address, format!("event {}: {e}", event.name))
                    })?;
                    Ok(EventParam {
                        indexed: input.indexed,
                        ty,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            events.insert(
                event.selector(),
                EventSpec {
                    name: event.name.clone(),
                    params,
                },
            );
        }
        Ok(Self {
            address: address.to_string(),
            events,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Names of the decodable events, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.values().map(|e| e.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Decode a log, or `None` if it doesn't match any event of this interface.
    pub fn decode(&self, log: &RawLog) -> Option<DecodedLog> {
        let selector: B256 = log.topics.first()?.parse().ok()?;
        let spec = self.events.get(&selector)?;

        // Same selector, different indexing (e.g. ERC-20 vs ERC-721 Transfer).
        if spec.indexed_count() != log.topics.len() - 1 {
            debug!(
                event = %spec.name,
                topics = log.topics.len(),
                "topic count does not match event signature"
            );
            return None;
        }

        let body_types: Vec<DynSolType> = spec
            .params
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.ty.clone())
            .collect();
        let mut body = if body_types.is_empty() {
            Vec::new()
        } else {
            let data = decode_hex(&log.data)?;
            match DynSolType::Tuple(body_types).abi_decode_params(&data) {
                Ok(DynSolValue::Tuple(values)) => values,
                Ok(other) => vec![other],
                Err(e) => {
                    debug!(event = %spec.name, error = %e, "log data does not decode");
                    return None;
                }
            }
        }
        .into_iter();

        let mut topics = log.topics[1..].iter();
        let mut args = Vec::with_capacity(spec.params.len());
        for param in &spec.params {
            let value = if param.indexed {
                decode_topic(topics.next()?, &param.ty)?
            } else {
                normalizer::normalize(body.next()?)
            };
            args.push(value);
        }

        Some(DecodedLog {
            event_name: spec.name.clone(),
            args,
        })
    }
}

fn invalid(address: &str, reason: impl std::fmt::Display) -> PulseError {
    PulseError::InvalidInterface {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()
}

fn is_hashed_when_indexed(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_)
    )
}

fn decode_topic(topic: &str, ty: &DynSolType) -> Option<Value> {
    let bytes = decode_hex(topic)?;
    if is_hashed_when_indexed(ty) {
        return Some(Value::String(normalizer::hex_string(&bytes)));
    }
    ty.abi_decode(&bytes).ok().map(normalizer::normalize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ERC20_ABI: &str = r#"[
        {"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]},
        {"type":"event","name":"Approval","anonymous":false,"inputs":[
            {"name":"owner","type":"address","indexed":true},
            {"name":"spender","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]},
        {"type":"event","name":"Memo","anonymous":false,"inputs":[
            {"name":"tag","type":"string","indexed":true},
            {"name":"note","type":"string","indexed":false}]},
        {"type":"function","name":"totalSupply","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}
    ]"#;

    const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    const TOKEN: &str = "0x1111111111111111111111111111111111111111";

    fn padded(addr_hex: &str) -> String {
        format!("0x{:0>64}", addr_hex.trim_start_matches("0x"))
    }

    fn transfer_log(value: u64) -> RawLog {
        RawLog {
            address: TOKEN.into(),
            topics: vec![
                TRANSFER.into(),
                padded("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
                padded("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359"),
            ],
            data: format!("0x{value:064x}"),
            block_number: 100,
            transaction_hash: Some("0xt1".into()),
            log_index: Some(0),
            removed: false,
        }
    }

    #[test]
    fn decodes_transfer_in_declaration_order() {
        let decoder = ContractDecoder::from_abi_json(TOKEN, ERC20_ABI).unwrap();
        let decoded = decoder.decode(&transfer_log(1000)).unwrap();
        assert_eq!(decoded.event_name, "Transfer");
        assert_eq!(
            decoded.args,
            vec![
                json!("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
                json!("0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"),
                json!("1000"),
            ]
        );
    }

    #[test]
    fn unknown_selector_is_skipped() {
        let decoder = ContractDecoder::from_abi_json(TOKEN, ERC20_ABI).unwrap();
        let mut log = transfer_log(1);
        log.topics[0] = format!("0x{}", "00".repeat(32));
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn mismatched_topic_count_is_skipped() {
        let decoder = ContractDecoder::from_abi_json(TOKEN, ERC20_ABI).unwrap();
        let mut log = transfer_log(1);
        log.topics.push(padded("0x01"));
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn indexed_string_yields_topic_hash() {
        let decoder = ContractDecoder::from_abi_json(TOKEN, ERC20_ABI).unwrap();
        let abi: JsonAbi = serde_json::from_str(ERC20_ABI).unwrap();
        let memo = abi.events().find(|e| e.name == "Memo").unwrap();

        let hash = format!("0x{}", "ab".repeat(32));
        // ABI encoding of a single dynamic string "hi".
        let data = format!(
            "0x{:064x}{:064x}{}",
            32,
            2,
            format!("{:0<64}", hex::encode("hi"))
        );
        let log = RawLog {
            topics: vec![format!("0x{}", hex::encode(memo.selector())), hash.clone()],
            data,
            ..transfer_log(0)
        };
        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.event_name, "Memo");
        assert_eq!(decoded.args, vec![json!(hash), json!("hi")]);
    }

    #[test]
    fn malformed_abi_is_rejected() {
        let err = ContractDecoder::from_abi_json(TOKEN, "not an abi").unwrap_err();
        assert!(matches!(err, PulseError::InvalidInterface { .. }));

        let bad_type = r#"[{"type":"event","name":"X","anonymous":false,
            "inputs":[{"name":"a","type":"uint77x","indexed":false}]}]"#;
        assert!(ContractDecoder::from_abi_json(TOKEN, bad_type).is_err());
    }

    #[test]
    fn abi_value_may_be_array_or_string() {
        let as_value: Value = serde_json::from_str(ERC20_ABI).unwrap();
        let from_array = ContractDecoder::from_abi_value(TOKEN, &as_value).unwrap();
        let from_string = ContractDecoder::from_abi_value(TOKEN, &json!(ERC20_ABI)).unwrap();
        assert_eq!(from_array.event_names(), vec!["Approval", "Memo", "Transfer"]);
        assert_eq!(from_string.event_names(), from_array.event_names());
    }
}
