//! Watched-contract registry.
//!
//! Maps a normalized contract address to the decoder built from its ABI.
//! Registrations can change at runtime while the pipeline is running; the
//! pipeline reads the current set of addresses once per block.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::info;

use chainpulse_core::error::PulseError;
use chainpulse_core::types::{normalize_address, RawLog};

use crate::decoder::{ContractDecoder, DecodedLog};

/// Thread-safe set of watched contracts.
#[derive(Default)]
pub struct ContractRegistry {
    decoders: RwLock<HashMap<String, Arc<ContractDecoder>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `address` with the given ABI JSON text, replacing any earlier
    /// registration for the same address.
    ///
    /// On failure the previous registration (if any) is left untouched.
    pub fn watch(&self, address: &str, abi_json: &str) -> Result<String, PulseError> {
        let address = registry_address(address)?;
        let decoder = ContractDecoder::from_abi_json(&address, abi_json)?;
        Ok(self.insert(address, decoder))
    }

    /// Like [`watch`](Self::watch), with the ABI as a JSON value (array or string).
    pub fn watch_value(&self, address: &str, abi: &Value) -> Result<String, PulseError> {
        let address = registry_address(address)?;
        let decoder = ContractDecoder::from_abi_value(&address, abi)?;
        Ok(self.insert(address, decoder))
    }

    fn insert(&self, address: String, decoder: ContractDecoder) -> String {
        info!(
            contract = %address,
            events = ?decoder.event_names(),
            "watching contract"
        );
        self.decoders
            .write()
            .unwrap()
            .insert(address.clone(), Arc::new(decoder));
        address
    }

    /// Stop watching `address`. Returns `true` if it was registered.
    pub fn unwatch(&self, address: &str) -> bool {
        let Ok(address) = normalize_address(address) else {
            return false;
        };
        self.decoders.write().unwrap().remove(&address).is_some()
    }

    pub fn is_watched(&self, address: &str) -> bool {
        normalize_address(address)
            .map(|a| self.decoders.read().unwrap().contains_key(&a))
            .unwrap_or(false)
    }

    /// Watched addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.decoders.read().unwrap().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.decoders.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode a log with the decoder registered for its emitting address.
    pub fn decode(&self, log: &RawLog) -> Option<DecodedLog> {
        let decoder = self
            .decoders
            .read()
            .unwrap()
            .get(&log.address.to_ascii_lowercase())
            .cloned()?;
        decoder.decode(log)
    }
}

fn registry_address(address: &str) -> Result<String, PulseError> {
    normalize_address(address).map_err(|e| PulseError::InvalidInterface {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";
    const APPROVAL_ONLY: &str = r#"[{"type":"event","name":"Approval","anonymous":false,"inputs":[
        {"name":"owner","type":"address","indexed":true},
        {"name":"spender","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}]"#;
    const TRANSFER_ONLY: &str = r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}]"#;

    #[test]
    fn watch_normalizes_and_replaces() {
        let registry = ContractRegistry::new();
        let addr = registry.watch(TOKEN, APPROVAL_ONLY).unwrap();
        assert_eq!(addr, TOKEN.to_ascii_lowercase());
        registry.watch(&TOKEN.to_ascii_lowercase(), TRANSFER_ONLY).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.is_watched(TOKEN));
        assert_eq!(registry.addresses(), vec![TOKEN.to_ascii_lowercase()]);
    }

    #[test]
    fn failed_watch_keeps_previous_registration() {
        let registry = ContractRegistry::new();
        registry.watch(TOKEN, TRANSFER_ONLY).unwrap();

        let err = registry.watch(TOKEN, "{ definitely not an abi").unwrap_err();
        assert!(matches!(err, PulseError::InvalidInterface { .. }));
        assert!(registry.is_watched(TOKEN));

        let log = RawLog {
            address: TOKEN.to_ascii_lowercase(),
            topics: vec![
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".into(),
                format!("0x{}", "00".repeat(32)),
                format!("0x{}", "00".repeat(32)),
            ],
            data: format!("0x{:064x}", 5),
            block_number: 1,
            transaction_hash: None,
            log_index: None,
            removed: false,
        };
        assert_eq!(registry.decode(&log).unwrap().args[2], json!("5"));
    }

    #[test]
    fn invalid_address_is_rejected() {
        let registry = ContractRegistry::new();
        assert!(registry.watch("0x1234", TRANSFER_ONLY).is_err());
        assert!(registry.watch_value("nope", &json!([])).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn unwatch_removes() {
        let registry = ContractRegistry::new();
        registry.watch(TOKEN, TRANSFER_ONLY).unwrap();
        assert!(registry.unwatch(TOKEN));
        assert!(!registry.unwatch(TOKEN));
        assert!(registry.is_empty());
    }
}
