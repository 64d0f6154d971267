//! Persistence and query interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PulseError;
use crate::types::{
    Block, ContractStateSnapshot, Event, EventNameStats, TimeWindow, Transaction,
};

/// Durable store for blocks, events, transactions and contract snapshots.
///
/// Contract addresses passed in are expected to be normalized (see
/// [`crate::normalize_address`]); backends compare them exactly.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert or replace a block keyed by its number.
    async fn store_block(&self, block: &Block) -> Result<(), PulseError>;

    /// Append an event and return its generated id.
    async fn store_event(&self, event: &Event) -> Result<i64, PulseError>;

    /// Insert or replace a transaction keyed by its hash.
    async fn store_transaction(&self, tx: &Transaction) -> Result<(), PulseError>;

    async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>, PulseError>;

    /// Insert or replace a snapshot keyed by (contract, block).
    async fn store_snapshot(&self, snapshot: &ContractStateSnapshot) -> Result<(), PulseError>;

    async fn get_snapshot(
        &self,
        contract: &str,
        block_number: u64,
    ) -> Result<Option<ContractStateSnapshot>, PulseError>;

    /// Blocks with `start <= number <= end`, ascending.
    async fn get_blocks_by_range(&self, start: u64, end: u64) -> Result<Vec<Block>, PulseError>;

    /// Newest `limit` events for a contract, by timestamp descending.
    async fn get_recent_events(
        &self,
        contract: &str,
        limit: usize,
    ) -> Result<Vec<Event>, PulseError>;

    /// Events for a contract with `start <= timestamp <= end`, ascending.
    async fn get_events_by_time_range(
        &self,
        contract: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, PulseError>;

    /// Events for a contract in a block range, ascending by block then id.
    async fn get_events_by_block_range(
        &self,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<Event>, PulseError>;

    /// Per-event-name aggregates over events with `timestamp > since`,
    /// ordered by count descending then name ascending.
    async fn get_metrics_since(
        &self,
        contract: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EventNameStats>, PulseError>;

    /// Aggregates over the trailing `window` ending now.
    async fn get_metrics(
        &self,
        contract: &str,
        window: TimeWindow,
    ) -> Result<Vec<EventNameStats>, PulseError> {
        self.get_metrics_since(contract, Utc::now() - window.duration())
            .await
    }
}
