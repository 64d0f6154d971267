//! Startup watch list: contracts to register before the pipeline starts.
//!
//! ```yaml
//! contracts:
//!   - address: "0x1111111111111111111111111111111111111111"
//!     abi: ./abis/token.json
//! ```
//!
//! Relative ABI paths resolve against the watch list's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use chainpulse_evm::ContractRegistry;

#[derive(Debug, Deserialize)]
pub struct WatchList {
    #[serde(default)]
    pub contracts: Vec<WatchEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WatchEntry {
    pub address: String,
    /// Path to a JSON ABI file.
    pub abi: PathBuf,
}

impl WatchList {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("invalid watch list YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read watch list {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Register every entry. Stops at the first entry that fails.
    pub fn register_all(&self, base_dir: &Path, registry: &ContractRegistry) -> Result<usize> {
        for entry in &self.contracts {
            let abi_path = if entry.abi.is_absolute() {
                entry.abi.clone()
            } else {
                base_dir.join(&entry.abi)
            };
            let abi = std::fs::read_to_string(&abi_path)
                .with_context(|| format!("cannot read ABI {}", abi_path.display()))?;
            registry
                .watch(&entry.address, &abi)
                .with_context(|| format!("cannot watch {}", entry.address))?;
        }
        info!(contracts = self.contracts.len(), "watch list registered");
        Ok(self.contracts.len())
    }
}
