//! Replay engine: a [`Timeline`] plus a cancelable playback timer.
//!
//! States: unloaded, then loaded with a cursor and a `playing` flag.
//! Navigation calls on an unloaded engine fail with `InvalidInput`.
//!
//! Playback runs as a tokio task that steps forward once per period and
//! stops by itself on the tick after the last block. Every `play`/`pause`
//! bumps a generation counter; a timer task whose generation is stale exits
//! without touching the cursor, so at most one timer ever moves it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{Block, Event};

use crate::diff::{diff_snapshots, StateDiff};
use crate::timeline::Timeline;

/// Serializable snapshot of an engine, for the inspector view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayView {
    pub contract_address: String,
    pub start_block: u64,
    pub end_block: u64,
    pub current_block: u64,
    pub playing: bool,
    /// Metadata of the current block.
    pub block: Option<Block>,
    /// Events at the current block.
    pub events: Vec<Event>,
    /// Loaded block numbers, ascending.
    pub block_numbers: Vec<u64>,
    /// Event count per block number.
    pub event_markers: BTreeMap<u64, usize>,
}

#[derive(Default)]
struct EngineState {
    timeline: Option<Timeline>,
    playing: bool,
    generation: u64,
    player: Option<JoinHandle<()>>,
}

impl EngineState {
    fn stop(&mut self) -> bool {
        let was_playing = self.playing;
        self.playing = false;
        self.generation += 1;
        if let Some(player) = self.player.take() {
            player.abort();
        }
        was_playing
    }

    fn timeline_mut(&mut self) -> Result<&mut Timeline, PulseError> {
        self.timeline
            .as_mut()
            .ok_or_else(|| PulseError::InvalidInput("no replay range loaded".into()))
    }
}

/// Navigates one loaded range. Cheap to share behind an `Arc`.
pub struct ReplayEngine {
    store: Arc<dyn EventStore>,
    state: Arc<Mutex<EngineState>>,
}

impl ReplayEngine {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Load `[start_block, end_block]` for `contract`, replacing any loaded
    /// range and stopping playback.
    pub async fn load(
        &self,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<ReplayView, PulseError> {
        let timeline = Timeline::load(self.store.as_ref(), contract, start_block, end_block).await?;
        info!(
            contract = %timeline.contract_address(),
            start_block,
            end_block,
            blocks = timeline.blocks().len(),
            "replay range loaded"
        );
        let mut state = self.state.lock().unwrap();
        state.stop();
        let view = view_of(&timeline, false);
        state.timeline = Some(timeline);
        Ok(view)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().timeline.is_some()
    }

    pub fn current_block(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .timeline
            .as_ref()
            .map(Timeline::current_block)
    }

    pub fn current_block_info(&self) -> Option<Block> {
        self.state
            .lock()
            .unwrap()
            .timeline
            .as_ref()
            .map(|t| t.current_block_info().clone())
    }

    /// Loaded blocks, ascending. Empty when nothing is loaded.
    pub fn blocks(&self) -> Vec<Block> {
        self.state
            .lock()
            .unwrap()
            .timeline
            .as_ref()
            .map(|t| t.blocks().to_vec())
            .unwrap_or_default()
    }

    /// Loaded events, ascending by block.
    pub fn events(&self) -> Vec<Event> {
        self.state
            .lock()
            .unwrap()
            .timeline
            .as_ref()
            .map(|t| t.events().to_vec())
            .unwrap_or_default()
    }

    pub fn event_markers(&self) -> BTreeMap<u64, Vec<Event>> {
        let state = self.state.lock().unwrap();
        let Some(timeline) = state.timeline.as_ref() else {
            return BTreeMap::new();
        };
        timeline
            .event_markers()
            .into_iter()
            .map(|(n, events)| (n, events.into_iter().cloned().collect()))
            .collect()
    }

    /// Jump to the loaded block nearest `block_number`.
    pub fn seek(&self, block_number: u64) -> Result<u64, PulseError> {
        Ok(self.state.lock().unwrap().timeline_mut()?.seek(block_number))
    }

    /// Returns `false` (and stays put) at the last block.
    pub fn step_forward(&self) -> Result<bool, PulseError> {
        Ok(self.state.lock().unwrap().timeline_mut()?.step_forward())
    }

    /// Returns `false` (and stays put) at the first block.
    pub fn step_backward(&self) -> Result<bool, PulseError> {
        Ok(self.state.lock().unwrap().timeline_mut()?.step_backward())
    }

    /// Stop playback and return to the first loaded block.
    pub fn reset(&self) -> Result<u64, PulseError> {
        let mut state = self.state.lock().unwrap();
        let timeline = state.timeline_mut()?;
        timeline.reset();
        let first = timeline.current_block();
        state.stop();
        Ok(first)
    }

    /// Start stepping forward every `1000 / speed` milliseconds.
    ///
    /// Any earlier playback is cancelled first. Fails with `InvalidInput`
    /// when `speed` is not a positive number or nothing is loaded.
    pub fn play(&self, speed: f64) -> Result<(), PulseError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PulseError::InvalidInput(format!(
                "playback speed must be positive, got {speed}"
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / speed)
            .map_err(|_| {
                PulseError::InvalidInput(format!("playback speed {speed} is too slow"))
            })?
            .max(Duration::from_millis(1));

        let mut state = self.state.lock().unwrap();
        state.timeline_mut()?;
        state.stop();
        state.playing = true;
        let generation = state.generation;
        state.player = Some(tokio::spawn(playback(
            Arc::clone(&self.state),
            generation,
            period,
        )));
        debug!(speed, period_ms = period.as_millis() as u64, "playback started");
        Ok(())
    }

    /// Cancel playback. Returns `true` if it was running.
    pub fn pause(&self) -> bool {
        self.state.lock().unwrap().stop()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Loaded events at exactly `block_number`.
    pub fn events_at(&self, block_number: u64) -> Result<Vec<Event>, PulseError> {
        let state = self.state.lock().unwrap();
        let timeline = state
            .timeline
            .as_ref()
            .ok_or_else(|| PulseError::InvalidInput("no replay range loaded".into()))?;
        Ok(timeline.events_at(block_number).into_iter().cloned().collect())
    }

    /// Diff the stored snapshots of `contract` at two blocks.
    ///
    /// Independent of the loaded range; a missing snapshot shows as unknown.
    pub async fn diff(
        &self,
        contract: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<StateDiff, PulseError> {
        diff_snapshots(self.store.as_ref(), contract, from_block, to_block).await
    }

    /// `None` until a range is loaded.
    pub fn view(&self) -> Option<ReplayView> {
        let state = self.state.lock().unwrap();
        state
            .timeline
            .as_ref()
            .map(|timeline| view_of(timeline, state.playing))
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stop();
        }
    }
}

fn view_of(timeline: &Timeline, playing: bool) -> ReplayView {
    let (start_block, end_block) = timeline.range();
    let current = timeline.current_block();
    ReplayView {
        contract_address: timeline.contract_address().to_string(),
        start_block,
        end_block,
        current_block: current,
        playing,
        block: Some(timeline.current_block_info().clone()),
        events: timeline.events_at(current).into_iter().cloned().collect(),
        block_numbers: timeline.blocks().iter().map(|b| b.block_number).collect(),
        event_markers: timeline
            .event_markers()
            .into_iter()
            .map(|(n, events)| (n, events.len()))
            .collect(),
    }
}

async fn playback(state: Arc<Mutex<EngineState>>, generation: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let mut state = state.lock().unwrap();
        if state.generation != generation || !state.playing {
            return;
        }
        let advanced = state
            .timeline
            .as_mut()
            .map(Timeline::step_forward)
            .unwrap_or(false);
        if !advanced {
            state.playing = false;
            state.player = None;
            debug!("playback reached end of range");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_core::types::ContractStateSnapshot;
    use chainpulse_storage::InMemoryStorage;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const TOKEN: &str = "0x1111111111111111111111111111111111111111";

    async fn store_with_blocks(numbers: &[u64]) -> Arc<dyn EventStore> {
        let store = InMemoryStorage::new();
        for &n in numbers {
            store
                .store_block(&Block {
                    block_number: n,
                    timestamp: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
                    transaction_count: 0,
                    gas_used: 0,
                    gas_limit: 30_000_000,
                })
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn unloaded_engine_rejects_navigation() {
        let engine = ReplayEngine::new(store_with_blocks(&[]).await);
        assert!(engine.view().is_none());
        assert!(matches!(engine.seek(5), Err(PulseError::InvalidInput(_))));
        assert!(matches!(engine.play(1.0), Err(PulseError::InvalidInput(_))));
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn load_of_empty_range_fails() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2]).await);
        let err = engine.load(TOKEN, 10, 20).await.unwrap_err();
        assert!(matches!(err, PulseError::EmptyRange { .. }));
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn rejects_non_positive_speed() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2]).await);
        engine.load(TOKEN, 1, 2).await.unwrap();
        assert!(engine.play(0.0).is_err());
        assert!(engine.play(-1.0).is_err());
        assert!(engine.play(f64::NAN).is_err());
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn rejects_speed_whose_period_overflows() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2]).await);
        engine.load(TOKEN, 1, 2).await.unwrap();
        assert!(matches!(engine.play(1e-300), Err(PulseError::InvalidInput(_))));
        assert!(!engine.is_playing());
        assert_eq!(engine.current_block(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn play_then_pause_moves_at_most_one_step() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2, 3, 4]).await);
        engine.load(TOKEN, 1, 4).await.unwrap();

        engine.play(1.0).unwrap();
        assert!(engine.is_playing());
        assert!(engine.pause());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(engine.current_block().unwrap() <= 2);
        assert!(!engine.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_steps_per_period_and_stops_at_end() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2, 3]).await);
        engine.load(TOKEN, 1, 3).await.unwrap();

        engine.play(2.0).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(engine.current_block(), Some(2));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.current_block(), Some(3));
        assert!(engine.is_playing());

        // The next tick finds no further block.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!engine.is_playing());
        assert_eq!(engine.current_block(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn replaying_cancels_the_previous_timer() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2, 3, 4, 5, 6]).await);
        engine.load(TOKEN, 1, 6).await.unwrap();

        engine.play(1.0).unwrap();
        engine.play(1.0).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        // Two live timers would have moved two blocks.
        assert_eq!(engine.current_block(), Some(2));
        engine.pause();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_playback() {
        let engine = ReplayEngine::new(store_with_blocks(&[1, 2, 3]).await);
        engine.load(TOKEN, 1, 3).await.unwrap();
        engine.seek(3).unwrap();
        engine.play(1.0).unwrap();

        assert_eq!(engine.reset().unwrap(), 1);
        assert!(!engine.is_playing());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.current_block(), Some(1));
    }

    #[tokio::test]
    async fn view_reports_cursor_and_markers() {
        let store = store_with_blocks(&[7, 8]).await;
        let ts = Utc.timestamp_opt(1_700_000_007, 0).unwrap();
        store
            .store_event(&Event {
                id: None,
                contract_address: TOKEN.into(),
                event_name: "Transfer".into(),
                block_number: 8,
                transaction_hash: Some(format!("0x{}", "ab".repeat(32))),
                args: vec![json!("1")],
                gas_used: Some(21_000),
                timestamp: ts,
                created_at: ts,
            })
            .await
            .unwrap();

        let engine = ReplayEngine::new(store);
        let view = engine.load(TOKEN, 7, 8).await.unwrap();
        assert_eq!(view.current_block, 7);
        assert!(view.events.is_empty());
        assert_eq!(view.block_numbers, vec![7, 8]);
        assert_eq!(view.event_markers.get(&8), Some(&1));

        engine.step_forward().unwrap();
        let view = engine.view().unwrap();
        assert_eq!(view.events.len(), 1);
        assert_eq!(view.block.unwrap().block_number, 8);

        assert_eq!(engine.blocks().len(), 2);
        assert_eq!(engine.events().len(), 1);
        assert_eq!(engine.event_markers()[&8][0].event_name, "Transfer");
        assert_eq!(engine.current_block_info().unwrap().block_number, 8);
    }

    #[tokio::test]
    async fn diff_reads_snapshots_from_store() {
        let store = store_with_blocks(&[1]).await;
        store
            .store_snapshot(&ContractStateSnapshot {
                contract_address: TOKEN.into(),
                block_number: 1,
                state_data: json!({"supply": "1"}).as_object().cloned().unwrap(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let engine = ReplayEngine::new(store);
        let diff = engine.diff(TOKEN, 1, 5).await.unwrap();
        assert_eq!(diff.to_state, crate::diff::SnapshotState::Unknown);
        assert_eq!(diff.changes.len(), 1);
    }
}
