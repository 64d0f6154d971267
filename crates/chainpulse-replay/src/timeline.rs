//! Timeline: an ordered view of the blocks and events of one contract over a
//! closed block range, with a cursor that only ever rests on a loaded block.

use std::collections::BTreeMap;

use tracing::debug;

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{normalize_address, Block, Event};

/// Blocks and events loaded once from storage, plus the cursor position.
#[derive(Debug, Clone)]
pub struct Timeline {
    contract_address: String,
    start_block: u64,
    end_block: u64,
    /// Loaded blocks, ascending and unique by number. Never empty.
    blocks: Vec<Block>,
    /// Contract events in range, ascending by block.
    events: Vec<Event>,
    /// Index into `blocks`.
    cursor: usize,
}

impl Timeline {
    /// Load `[start_block, end_block]` for `contract` from `store`.
    ///
    /// The cursor starts on the first loaded block. Fails with
    /// [`PulseError::EmptyRange`] when no block in range is stored.
    pub async fn load(
        store: &dyn EventStore,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Self, PulseError> {
        if start_block > end_block {
            return Err(PulseError::InvalidInput(format!(
                "startBlock {start_block} is after endBlock {end_block}"
            )));
        }
        let contract = normalize_address(contract)?;
        let blocks = store.get_blocks_by_range(start_block, end_block).await?;
        let events = store
            .get_events_by_block_range(&contract, start_block, end_block)
            .await?;
        debug!(
            contract = %contract,
            blocks = blocks.len(),
            events = events.len(),
            "timeline loaded"
        );
        Self::from_parts(contract, start_block, end_block, blocks, events)
    }

    /// Build a timeline from already-fetched rows.
    pub fn from_parts(
        contract_address: String,
        start_block: u64,
        end_block: u64,
        mut blocks: Vec<Block>,
        mut events: Vec<Event>,
    ) -> Result<Self, PulseError> {
        blocks.retain(|b| (start_block..=end_block).contains(&b.block_number));
        blocks.sort_by_key(|b| b.block_number);
        blocks.dedup_by_key(|b| b.block_number);
        if blocks.is_empty() {
            return Err(PulseError::EmptyRange {
                start_block,
                end_block,
            });
        }

        events.retain(|e| (start_block..=end_block).contains(&e.block_number));
        // Stable: keeps insertion order within a block.
        events.sort_by_key(|e| e.block_number);

        Ok(Self {
            contract_address,
            start_block,
            end_block,
            blocks,
            events,
            cursor: 0,
        })
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    /// The requested range, which may be wider than the loaded blocks.
    pub fn range(&self) -> (u64, u64) {
        (self.start_block, self.end_block)
    }

    pub fn current_block(&self) -> u64 {
        self.blocks[self.cursor].block_number
    }

    pub fn current_block_info(&self) -> &Block {
        &self.blocks[self.cursor]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Move to the loaded block nearest `block_number`.
    ///
    /// Equidistant neighbours resolve to the lower block. Returns the block
    /// the cursor landed on.
    pub fn seek(&mut self, block_number: u64) -> u64 {
        let idx = self.blocks.partition_point(|b| b.block_number < block_number);
        self.cursor = if idx == self.blocks.len() {
            idx - 1
        } else if idx == 0 || self.blocks[idx].block_number == block_number {
            idx
        } else {
            let below = block_number - self.blocks[idx - 1].block_number;
            let above = self.blocks[idx].block_number - block_number;
            if below <= above {
                idx - 1
            } else {
                idx
            }
        };
        self.current_block()
    }

    /// Advance to the next loaded block. Returns `false` at the last block.
    pub fn step_forward(&mut self) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Go back to the previous loaded block. Returns `false` at the first block.
    pub fn step_backward(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Return to the first loaded block.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor + 1 >= self.blocks.len()
    }

    /// Loaded events emitted in exactly `block_number`, in insertion order.
    ///
    /// Works for blocks whose metadata is not loaded.
    pub fn events_at(&self, block_number: u64) -> Vec<&Event> {
        let start = self.events.partition_point(|e| e.block_number < block_number);
        self.events[start..]
            .iter()
            .take_while(|e| e.block_number == block_number)
            .collect()
    }

    /// Events grouped by block number, for timeline markers.
    pub fn event_markers(&self) -> BTreeMap<u64, Vec<&Event>> {
        let mut markers: BTreeMap<u64, Vec<&Event>> = BTreeMap::new();
        for event in &self.events {
            markers.entry(event.block_number).or_default().push(event);
        }
        markers
    }
}
