//! Converts alloy `DynSolValue` into the JSON rendering stored with events.
//!
//! Integers become decimal strings so 256-bit values survive JSON, addresses
//! are EIP-55 checksummed, byte strings are `0x`-hex, and arrays and tuples
//! become JSON arrays.

use alloy_dyn_abi::DynSolValue;
use serde_json::Value;

/// Render a decoded ABI value as JSON.
pub fn normalize(val: DynSolValue) -> Value {
    match val {
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex_string(&word[..size])),
        DynSolValue::Bytes(b) => Value::String(hex_string(&b)),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Function(f) => Value::String(hex_string(f.as_slice())),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.into_iter().map(normalize).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// `0x`-prefixed lowercase hex.
pub fn hex_string(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
