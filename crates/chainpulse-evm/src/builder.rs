//! Fluent builder API for the ingestion pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainpulse_evm::PipelineBuilder;
//!
//! let config = PipelineBuilder::new()
//!     .receipt_lookups(true)
//!     .metrics_interval_ms(1000)
//!     .recent_events_on_subscribe(10)
//!     .build_config();
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chainpulse_core::connector::ChainConnector;
use chainpulse_core::error::PulseError;
use chainpulse_core::live::LiveHub;
use chainpulse_core::metrics::PipelineMetrics;
use chainpulse_core::store::EventStore;

use crate::pipeline::IngestionPipeline;
use crate::registry::ContractRegistry;

/// Tunables for [`IngestionPipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fetch each transaction receipt to attach gas usage to events.
    pub receipt_lookups: bool,
    /// Persist a transaction row for every fetched receipt.
    pub materialize_transactions: bool,
    /// Metrics tick period (milliseconds).
    pub metrics_interval_ms: u64,
    /// Per-topic live channel capacity.
    pub channel_capacity: usize,
    /// Events pushed to a live subscriber when it subscribes.
    pub recent_events_on_subscribe: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receipt_lookups: true,
            materialize_transactions: true,
            metrics_interval_ms: 1000,
            channel_capacity: 1024,
            recent_events_on_subscribe: 10,
        }
    }
}

/// Fluent builder for [`PipelineConfig`] and [`IngestionPipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    connector: Option<Arc<dyn ChainConnector>>,
    store: Option<Arc<dyn EventStore>>,
    registry: Option<Arc<ContractRegistry>>,
    hub: Option<Arc<LiveHub>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn receipt_lookups(mut self, enabled: bool) -> Self {
        self.config.receipt_lookups = enabled;
        self
    }

    pub fn materialize_transactions(mut self, enabled: bool) -> Self {
        self.config.materialize_transactions = enabled;
        self
    }

    pub fn metrics_interval_ms(mut self, ms: u64) -> Self {
        self.config.metrics_interval_ms = ms;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn recent_events_on_subscribe(mut self, n: usize) -> Self {
        self.config.recent_events_on_subscribe = n;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn ChainConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a registry with other components (e.g. the HTTP surface).
    pub fn registry(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn hub(mut self, hub: Arc<LiveHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the `PipelineConfig` alone.
    pub fn build_config(self) -> PipelineConfig {
        self.config
    }

    /// Build the pipeline. A connector and a store are required.
    pub fn build(self) -> Result<IngestionPipeline, PulseError> {
        let connector = self
            .connector
            .ok_or_else(|| PulseError::InvalidInput("pipeline requires a connector".into()))?;
        let store = self
            .store
            .ok_or_else(|| PulseError::InvalidInput("pipeline requires a store".into()))?;
        let hub = self
            .hub
            .unwrap_or_else(|| Arc::new(LiveHub::new(self.config.channel_capacity)));
        Ok(IngestionPipeline::new(
            connector,
            store,
            self.registry.unwrap_or_default(),
            hub,
            self.metrics.unwrap_or_default(),
            self.config,
        ))
    }
}
