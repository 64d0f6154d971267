//! chainpulse-storage: [`EventStore`](chainpulse_core::EventStore) backends.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! [`open`] picks a backend from a connection string.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use chainpulse_core::{EventStore, PulseError};

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Open a store from a connection string.
///
/// `memory` (or `memory:`) selects the in-memory backend; `sqlite:<path>`,
/// `sqlite::memory:` or a bare file path select SQLite.
pub async fn open(url: &str) -> Result<Arc<dyn EventStore>, PulseError> {
    if url == "memory" || url == "memory:" {
        return Ok(Arc::new(InMemoryStorage::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = if url == "sqlite::memory:" {
            SqliteStorage::in_memory().await?
        } else {
            SqliteStorage::open(url).await?
        };
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    Err(PulseError::InvalidInput(format!(
        "unsupported database url '{url}' (built without the sqlite feature)"
    )))
}
