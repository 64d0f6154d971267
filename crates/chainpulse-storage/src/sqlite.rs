//! SQLite storage backend for ChainPulse.
//!
//! Persists blocks, events, transactions and contract snapshots to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//! Timestamps are stored as integer milliseconds since the Unix epoch.
//!
//! # Usage
//! ```rust,no_run
//! use chainpulse_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainpulse.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{
    Block, ContractStateSnapshot, Event, EventNameStats, Transaction,
};

const EVENT_COLUMNS: &str = "id, contract_address, event_name, block_number, transaction_hash, \
                             args, gas_used, timestamp, created_at";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        block_number      INTEGER PRIMARY KEY,
        timestamp         INTEGER NOT NULL,
        transaction_count INTEGER NOT NULL,
        gas_used          INTEGER NOT NULL,
        gas_limit         INTEGER NOT NULL,
        created_at        INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        contract_address TEXT    NOT NULL,
        event_name       TEXT    NOT NULL,
        block_number     INTEGER NOT NULL,
        transaction_hash TEXT,
        args             TEXT    NOT NULL,
        gas_used         INTEGER,
        timestamp        INTEGER NOT NULL,
        created_at       INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS transactions (
        hash         TEXT    PRIMARY KEY,
        block_number INTEGER NOT NULL,
        from_address TEXT    NOT NULL,
        to_address   TEXT,
        value        TEXT,
        gas_used     INTEGER NOT NULL,
        gas_price    INTEGER,
        status       INTEGER NOT NULL,
        timestamp    INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS contract_states (
        contract_address TEXT    NOT NULL,
        block_number     INTEGER NOT NULL,
        state_data       TEXT    NOT NULL,
        timestamp        INTEGER NOT NULL,
        PRIMARY KEY (contract_address, block_number)
    );",
    "CREATE INDEX IF NOT EXISTS idx_events_contract_block ON events (contract_address, block_number);",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);",
    "CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks (timestamp);",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (block_number);",
];

fn storage_err(e: impl std::fmt::Display) -> PulseError {
    PulseError::Persistence(e.to_string())
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Map an inclusive `u64` block range onto SQLite's signed integers.
///
/// `None` when no stored block can fall in the range.
fn block_bounds(start: u64, end: u64) -> Option<(i64, i64)> {
    if start > end {
        return None;
    }
    let start = i64::try_from(start).ok()?;
    Some((start, i64::try_from(end).unwrap_or(i64::MAX)))
}

/// SQLite-backed event store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database.
    ///
    /// The path may be a plain file path (`"./chainpulse.db"`) or a full
    /// SQLite URL (`"sqlite:./chainpulse.db"`).
    pub async fn open(path: &str) -> Result<Self, PulseError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        debug!(url = %url, "sqlite store opened");
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to a single connection: every `:memory:` connection is its own
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, PulseError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), PulseError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> Result<u64, PulseError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        Ok(n as u64)
    }

    async fn fetch_events(
        &self,
        sql: &str,
        contract: &str,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<Event>, PulseError> {
        let rows = sqlx::query(sql)
            .bind(contract)
            .bind(lo)
            .bind(hi)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(event_from_row).collect()
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn block_from_row(row: &SqliteRow) -> Result<Block, PulseError> {
    Ok(Block {
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        timestamp: from_millis(row.try_get("timestamp").map_err(storage_err)?),
        transaction_count: row.try_get::<i64, _>("transaction_count").map_err(storage_err)? as u32,
        gas_used: row.try_get::<i64, _>("gas_used").map_err(storage_err)? as u64,
        gas_limit: row.try_get::<i64, _>("gas_limit").map_err(storage_err)? as u64,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event, PulseError> {
    let args: String = row.try_get("args").map_err(storage_err)?;
    let args: Vec<Value> = serde_json::from_str(&args).map_err(storage_err)?;
    Ok(Event {
        id: Some(row.try_get("id").map_err(storage_err)?),
        contract_address: row.try_get("contract_address").map_err(storage_err)?,
        event_name: row.try_get("event_name").map_err(storage_err)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        transaction_hash: row.try_get("transaction_hash").map_err(storage_err)?,
        args,
        gas_used: row
            .try_get::<Option<i64>, _>("gas_used")
            .map_err(storage_err)?
            .map(|g| g as u64),
        timestamp: from_millis(row.try_get("timestamp").map_err(storage_err)?),
        created_at: from_millis(row.try_get("created_at").map_err(storage_err)?),
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, PulseError> {
    Ok(Transaction {
        hash: row.try_get("hash").map_err(storage_err)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        from: row.try_get("from_address").map_err(storage_err)?,
        to: row.try_get("to_address").map_err(storage_err)?,
        value: row.try_get("value").map_err(storage_err)?,
        gas_used: row.try_get::<i64, _>("gas_used").map_err(storage_err)? as u64,
        gas_price: row
            .try_get::<Option<i64>, _>("gas_price")
            .map_err(storage_err)?
            .map(|p| p as u64),
        status: row.try_get::<i64, _>("status").map_err(storage_err)? as u8,
        timestamp: from_millis(row.try_get("timestamp").map_err(storage_err)?),
    })
}

// ─── EventStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn store_block(&self, block: &Block) -> Result<(), PulseError> {
        sqlx::query(
            "INSERT INTO blocks (block_number, timestamp, transaction_count, gas_used, gas_limit, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(block_number) DO UPDATE SET
                timestamp         = excluded.timestamp,
                transaction_count = excluded.transaction_count,
                gas_used          = excluded.gas_used,
                gas_limit         = excluded.gas_limit",
        )
        .bind(block.block_number as i64)
        .bind(to_millis(block.timestamp))
        .bind(block.transaction_count as i64)
        .bind(block.gas_used as i64)
        .bind(block.gas_limit as i64)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn store_event(&self, event: &Event) -> Result<i64, PulseError> {
        let args = serde_json::to_string(&event.args).map_err(storage_err)?;
        let result = sqlx::query(
            "INSERT INTO events (contract_address, event_name, block_number, transaction_hash,
                                 args, gas_used, timestamp, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.contract_address)
        .bind(&event.event_name)
        .bind(event.block_number as i64)
        .bind(&event.transaction_hash)
        .bind(args)
        .bind(event.gas_used.map(|g| g as i64))
        .bind(to_millis(event.timestamp))
        .bind(to_millis(event.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn store_transaction(&self, tx: &Transaction) -> Result<(), PulseError> {
        sqlx::query(
            "INSERT INTO transactions (hash, block_number, from_address, to_address, value,
                                       gas_used, gas_price, status, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(hash) DO UPDATE SET
                block_number = excluded.block_number,
                from_address = excluded.from_address,
                to_address   = excluded.to_address,
                value        = excluded.value,
                gas_used     = excluded.gas_used,
                gas_price    = excluded.gas_price,
                status       = excluded.status,
                timestamp    = excluded.timestamp",
        )
        .bind(&tx.hash)
        .bind(tx.block_number as i64)
        .bind(&tx.from)
        .bind(&tx.to)
        .bind(&tx.value)
        .bind(tx.gas_used as i64)
        .bind(tx.gas_price.map(|p| p as i64))
        .bind(tx.status as i64)
        .bind(to_millis(tx.timestamp))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>, PulseError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn store_snapshot(&self, snapshot: &ContractStateSnapshot) -> Result<(), PulseError> {
        let state = serde_json::to_string(&snapshot.state_data).map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO contract_states (contract_address, block_number, state_data, timestamp)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(contract_address, block_number) DO UPDATE SET
                state_data = excluded.state_data,
                timestamp  = excluded.timestamp",
        )
        .bind(&snapshot.contract_address)
        .bind(snapshot.block_number as i64)
        .bind(state)
        .bind(to_millis(snapshot.timestamp))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        contract: &str,
        block_number: u64,
    ) -> Result<Option<ContractStateSnapshot>, PulseError> {
        let row = sqlx::query(
            "SELECT contract_address, block_number, state_data, timestamp
             FROM contract_states WHERE contract_address = ? AND block_number = ?",
        )
        .bind(contract)
        .bind(block_number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state_data").map_err(storage_err)?;
        let state_data: Map<String, Value> = serde_json::from_str(&state).map_err(storage_err)?;
        Ok(Some(ContractStateSnapshot {
            contract_address: row.try_get("contract_address").map_err(storage_err)?,
            block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
            state_data,
            timestamp: from_millis(row.try_get("timestamp").map_err(storage_err)?),
        }))
    }

    async fn get_blocks_by_range(&self, start: u64, end: u64) -> Result<Vec<Block>, PulseError> {
        let Some((lo, hi)) = block_bounds(start, end) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT block_number, timestamp, transaction_count, gas_used, gas_limit
             FROM blocks WHERE block_number >= ? AND block_number <= ?
             ORDER BY block_number ASC",
        )
        .bind(lo)
        .bind(hi)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(block_from_row).collect()
    }

    async fn get_recent_events(
        &self,
        contract: &str,
        limit: usize,
    ) -> Result<Vec<Event>, PulseError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE contract_address = ?
             ORDER BY timestamp DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(contract)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn get_events_by_time_range(
        &self,
        contract: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, PulseError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE contract_address = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp ASC, id ASC"
        );
        self.fetch_events(&sql, contract, to_millis(start), to_millis(end))
            .await
    }

    async fn get_events_by_block_range(
        &self,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<Event>, PulseError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE contract_address = ? AND block_number >= ? AND block_number <= ?
             ORDER BY block_number ASC, id ASC"
        );
        let Some((lo, hi)) = block_bounds(start_block, end_block) else {
            return Ok(Vec::new());
        };
        self.fetch_events(&sql, contract, lo, hi).await
    }

    async fn get_metrics_since(
        &self,
        contract: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<EventNameStats>, PulseError> {
        let rows = sqlx::query(
            "SELECT event_name,
                    COUNT(*)                     AS event_count,
                    COUNT(DISTINCT block_number) AS blocks_with_events,
                    AVG(gas_used)                AS avg_gas_used
             FROM events
             WHERE contract_address = ? AND timestamp > ?
             GROUP BY event_name
             ORDER BY event_count DESC, event_name ASC",
        )
        .bind(contract)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                Ok(EventNameStats {
                    event_name: row.try_get("event_name").map_err(storage_err)?,
                    event_count: row.try_get::<i64, _>("event_count").map_err(storage_err)? as u64,
                    blocks_with_events: row
                        .try_get::<i64, _>("blocks_with_events")
                        .map_err(storage_err)? as u64,
                    avg_gas_used: row.try_get("avg_gas_used").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
