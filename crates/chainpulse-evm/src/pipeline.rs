//! The ingestion pipeline. Turns new-block notifications into stored,
//! decoded events and live updates.
//!
//! # Per block
//! 1. Fetch the block header. On failure the block is skipped.
//! 2. Fetch logs for every watched contract and decode them. Logs that
//!    match no known event are skipped.
//! 3. Fetch each transaction receipt once, to attach gas usage.
//! 4. Persist the block, the transactions and the events.
//! 5. Publish `new-event` to each contract topic and `new-block` globally.
//!
//! Failures are isolated to the smallest unit: a bad block, log, receipt or
//! insert never stops the loop. Only losing the block feed does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chainpulse_core::connector::ChainConnector;
use chainpulse_core::error::PulseError;
use chainpulse_core::live::{LiveHub, LiveMessage, Topic};
use chainpulse_core::metrics::PipelineMetrics;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{Block, Event, Receipt, Transaction};

use crate::builder::PipelineConfig;
use crate::registry::ContractRegistry;

/// Outcome of ingesting one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub block_number: u64,
    /// Logs decoded against a watched contract.
    pub decoded: usize,
    /// Events successfully persisted and published.
    pub persisted: usize,
    /// Receipts that could not be fetched.
    pub missing_receipts: usize,
    /// Whether the block row was persisted.
    pub block_stored: bool,
}

/// Live event ingestion over a [`ChainConnector`] into an [`EventStore`].
pub struct IngestionPipeline {
    connector: Arc<dyn ChainConnector>,
    store: Arc<dyn EventStore>,
    registry: Arc<ContractRegistry>,
    hub: Arc<LiveHub>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        connector: Arc<dyn ChainConnector>,
        store: Arc<dyn EventStore>,
        registry: Arc<ContractRegistry>,
        hub: Arc<LiveHub>,
        metrics: Arc<PipelineMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            connector,
            store,
            registry,
            hub,
            metrics,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Follow the chain head until the block feed ends.
    ///
    /// Blocks are processed one at a time in notification order. Returns
    /// [`PulseError::Connection`] when the feed ends or cannot be opened.
    pub async fn run(&self) -> Result<(), PulseError> {
        let mut heads = self.connector.subscribe_new_blocks().await?;
        info!(contracts = self.registry.len(), "pipeline following chain head");

        while let Some(block_number) = heads.next().await {
            match self.process_block(block_number).await {
                Ok(report) => debug!(
                    block = report.block_number,
                    decoded = report.decoded,
                    persisted = report.persisted,
                    "block processed"
                ),
                Err(e) => warn!(block = block_number, error = %e, "skipping block"),
            }
        }

        error!("block notification stream ended");
        Err(PulseError::Connection("block notification stream ended".into()))
    }

    /// Ingest a single block.
    ///
    /// Errors only when the block header itself is unavailable; every later
    /// failure is logged, counted and absorbed.
    pub async fn process_block(&self, block_number: u64) -> Result<BlockReport, PulseError> {
        let block = self.connector.get_block(block_number).await?;
        let mut report = BlockReport {
            block_number,
            ..Default::default()
        };

        let addresses = self.registry.addresses();
        let logs = if addresses.is_empty() {
            Vec::new()
        } else {
            match self.connector.get_logs(block_number, &addresses).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(block = block_number, error = %e, "log fetch failed, no events for block");
                    Vec::new()
                }
            }
        };

        let mut receipts: HashMap<String, Option<Receipt>> = HashMap::new();
        let mut events = Vec::new();
        for log in logs.iter().filter(|l| !l.removed) {
            let Some(decoded) = self.registry.decode(log) else {
                debug!(contract = %log.address, topic0 = ?log.topics.first(), "undecodable log skipped");
                continue;
            };

            let mut gas_used = None;
            if self.config.receipt_lookups {
                if let Some(hash) = &log.transaction_hash {
                    if !receipts.contains_key(hash) {
                        let receipt = self.fetch_receipt(hash).await;
                        if receipt.is_none() {
                            report.missing_receipts += 1;
                        }
                        receipts.insert(hash.clone(), receipt);
                    }
                    gas_used = receipts
                        .get(hash)
                        .and_then(|r| r.as_ref())
                        .map(|r| r.gas_used);
                }
            }

            events.push(Event {
                id: None,
                contract_address: log.address.to_ascii_lowercase(),
                event_name: decoded.event_name,
                block_number: log.block_number,
                transaction_hash: log.transaction_hash.clone(),
                args: decoded.args,
                gas_used,
                timestamp: block.timestamp,
                created_at: Utc::now(),
            });
        }
        report.decoded = events.len();

        report.block_stored = self.persist_block(&block).await;

        if self.config.materialize_transactions {
            for receipt in receipts.values().flatten() {
                let tx = Transaction::from_receipt(receipt, block.timestamp);
                if let Err(e) = self.store.store_transaction(&tx).await {
                    self.metrics.record_error();
                    error!(tx = %tx.hash, error = %e, "failed to store transaction");
                }
            }
        }

        for mut event in events {
            match self.store.store_event(&event).await {
                Ok(id) => {
                    event.id = Some(id);
                    let topic = Topic::Contract(event.contract_address.clone());
                    self.hub.publish(&topic, LiveMessage::NewEvent(event));
                    self.metrics.record_event(Utc::now());
                    report.persisted += 1;
                }
                Err(e) => {
                    self.metrics.record_error();
                    error!(
                        block = block_number,
                        contract = %event.contract_address,
                        event = %event.event_name,
                        error = %e,
                        "failed to store event"
                    );
                }
            }
        }

        if report.block_stored {
            self.hub.publish(&Topic::Global, LiveMessage::NewBlock(block));
        }
        Ok(report)
    }

    async fn fetch_receipt(&self, tx_hash: &str) -> Option<Receipt> {
        match self.connector.get_transaction_receipt(tx_hash).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                warn!(tx = tx_hash, error = %e, "receipt unavailable, gas unknown");
                None
            }
        }
    }

    async fn persist_block(&self, block: &Block) -> bool {
        match self.store.store_block(block).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_error();
                error!(block = block.block_number, error = %e, "failed to store block");
                false
            }
        }
    }

    /// Start the metrics ticker for this pipeline's counters.
    pub fn spawn_metrics_ticker(&self) -> JoinHandle<()> {
        spawn_metrics_ticker(
            Arc::clone(&self.metrics),
            Arc::clone(&self.hub),
            Duration::from_millis(self.config.metrics_interval_ms.max(1)),
        )
    }
}

/// Every `period`, recompute the event rate and push a `metrics-update`
/// to the global topic.
pub fn spawn_metrics_ticker(
    metrics: Arc<PipelineMetrics>,
    hub: Arc<LiveHub>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        metrics.tick();
        loop {
            interval.tick().await;
            let snapshot = metrics.tick();
            hub.publish(&Topic::Global, LiveMessage::MetricsUpdate(snapshot));
        }
    })
}
