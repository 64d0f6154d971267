//! chainpulse-core: shared vocabulary for the ChainPulse event pipeline.
//!
//! # Architecture
//!
//! ```text
//! ChainConnector ──► IngestionPipeline ──► EventStore (memory / SQLite)
//!                           │                    │
//!                           ├── PipelineMetrics  └──► Timeline / ReplayEngine
//!                           └── LiveHub ──► live channel subscribers
//! ```
//!
//! This crate holds the data model and the two seams every other crate
//! builds against: [`ChainConnector`] (upstream chain access) and
//! [`EventStore`] (persistence and queries).

pub mod connector;
pub mod error;
pub mod live;
pub mod metrics;
pub mod store;
pub mod types;

pub use connector::{BlockNumberStream, ChainConnector};
pub use error::PulseError;
pub use live::{LiveHub, LiveMessage, Topic};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use store::EventStore;
pub use types::{
    normalize_address, Block, ContractStateSnapshot, Event, EventNameStats, RawLog, Receipt,
    TimeWindow, Transaction,
};
