//! chainpulse-evm: EVM chain access and the event ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! WsConnector (newHeads) ──► IngestionPipeline::run
//!                                 ├── get_block / get_logs (watched addresses)
//!                                 ├── ContractRegistry::decode (per-contract ABI)
//!                                 ├── get_transaction_receipt (once per tx)
//!                                 ├── EventStore (block, events, transactions)
//!                                 └── LiveHub (new-event / new-block)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainpulse_evm::{PipelineBuilder, WsConnector, WsConnectorConfig};
//! use chainpulse_storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), chainpulse_core::PulseError> {
//! let connector = WsConnector::connect("wss://dream-rpc.somnia.network/ws", WsConnectorConfig::default()).await?;
//! let pipeline = PipelineBuilder::new()
//!     .connector(Arc::new(connector))
//!     .store(Arc::new(InMemoryStorage::new()))
//!     .build()?;
//! pipeline.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod decoder;
pub mod normalizer;
pub mod pipeline;
pub mod registry;
pub mod rpc;
pub mod ws;

pub use builder::{PipelineBuilder, PipelineConfig};
pub use decoder::{ContractDecoder, DecodedLog};
pub use pipeline::{BlockReport, IngestionPipeline};
pub use registry::ContractRegistry;
pub use ws::{WsConnector, WsConnectorConfig};
