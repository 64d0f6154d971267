//! In-memory storage backend.
//!
//! Keeps blocks, events, transactions and snapshots in RAM.
//! Useful for tests and short-lived runs that don't need persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{
    Block, ContractStateSnapshot, Event, EventNameStats, Transaction,
};

/// In-memory event store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    blocks: Mutex<BTreeMap<u64, Block>>,
    events: Mutex<Vec<Event>>,
    transactions: Mutex<HashMap<String, Transaction>>,
    snapshots: Mutex<HashMap<(String, u64), ContractStateSnapshot>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Total number of stored blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    fn events_for(&self, contract: &str) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.contract_address == contract)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn store_block(&self, block: &Block) -> Result<(), PulseError> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.block_number, block.clone());
        Ok(())
    }

    async fn store_event(&self, event: &Event) -> Result<i64, PulseError> {
        let mut events = self.events.lock().unwrap();
        let id = events.len() as i64 + 1;
        let mut stored = event.clone();
        stored.id = Some(id);
        events.push(stored);
        Ok(id)
    }

    async fn store_transaction(&self, tx: &Transaction) -> Result<(), PulseError> {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.hash.clone(), tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>, PulseError> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }

    async fn store_snapshot(&self, snapshot: &ContractStateSnapshot) -> Result<(), PulseError> {
        self.snapshots.lock().unwrap().insert(
            (snapshot.contract_address.clone(), snapshot.block_number),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn get_snapshot(
        &self,
        contract: &str,
        block_number: u64,
    ) -> Result<Option<ContractStateSnapshot>, PulseError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&(contract.to_string(), block_number))
            .cloned())
    }

    async fn get_blocks_by_range(&self, start: u64, end: u64) -> Result<Vec<Block>, PulseError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .range(start..=end)
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn get_recent_events(
        &self,
        contract: &str,
        limit: usize,
    ) -> Result<Vec<Event>, PulseError> {
        let mut events = self.events_for(contract);
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn get_events_by_time_range(
        &self,
        contract: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, PulseError> {
        let mut events: Vec<Event> = self
            .events_for(contract)
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_events_by_block_range(
        &self,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<Event>, PulseError> {
        let mut events: Vec<Event> = self
            .events_for(contract)
            .into_iter()
            .filter(|e| e.block_number >= start_block && e.block_number <= end_block)
            .collect();
        events.sort_by(|a, b| a.block_number.cmp(&b.block_number).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_metrics_since(
        &self,
        contract: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EventNameStats>, PulseError> {
        #[derive(Default)]
        struct Acc {
            count: u64,
            blocks: HashSet<u64>,
            gas_sum: f64,
            gas_n: u64,
        }

        let mut groups: HashMap<String, Acc> = HashMap::new();
        for e in self
            .events_for(contract)
            .into_iter()
            .filter(|e| e.timestamp > since)
        {
            let acc = groups.entry(e.event_name.clone()).or_default();
            acc.count += 1;
            acc.blocks.insert(e.block_number);
            if let Some(gas) = e.gas_used {
                acc.gas_sum += gas as f64;
                acc.gas_n += 1;
            }
        }

        let mut stats: Vec<EventNameStats> = groups
            .into_iter()
            .map(|(name, acc)| EventNameStats {
                event_name: name,
                event_count: acc.count,
                blocks_with_events: acc.blocks.len() as u64,
                avg_gas_used: (acc.gas_n > 0).then(|| acc.gas_sum / acc.gas_n as f64),
            })
            .collect();
        stats.sort_by(|a, b| {
            b.event_count
                .cmp(&a.event_count)
                .then_with(|| a.event_name.cmp(&b.event_name))
        });
        Ok(stats)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
