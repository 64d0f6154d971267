//! Upstream chain access.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::PulseError;
use crate::types::{Block, RawLog, Receipt};

/// Stream of new block numbers, in the order the upstream announces them.
///
/// The stream ends when the upstream connection is lost.
pub type BlockNumberStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

/// Abstraction over an EVM-compatible chain endpoint.
///
/// Implemented by the WebSocket JSON-RPC connector in `chainpulse-evm`;
/// tests use scripted in-memory connectors.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Subscribe to new block heads.
    async fn subscribe_new_blocks(&self) -> Result<BlockNumberStream, PulseError>;

    /// Fetch a block header by number.
    async fn get_block(&self, block_number: u64) -> Result<Block, PulseError>;

    /// Fetch the receipt for a transaction hash.
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Receipt, PulseError>;

    /// Fetch logs emitted in `block_number` by any of `addresses`.
    ///
    /// Implementations return an empty list without a network call when
    /// `addresses` is empty.
    async fn get_logs(
        &self,
        block_number: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, PulseError>;
}
