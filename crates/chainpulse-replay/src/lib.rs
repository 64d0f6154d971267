//! chainpulse-replay: deterministic scrubbing over stored chain history.
//!
//! # Architecture
//!
//! ```text
//! EventStore ──load──► Timeline (blocks + events, cursor)
//!                          │
//!                 ReplayEngine (seek / step / play / pause)
//!                          │
//!                 SessionRegistry (one engine per HTTP session)
//! ```
//!
//! The engine only ever reads from an [`EventStore`](chainpulse_core::EventStore);
//! it never talks to the live connector.

pub mod diff;
pub mod engine;
pub mod sessions;
pub mod timeline;

pub use diff::{compute_diff, diff_snapshots, ChangeKind, KeyChange, SnapshotState, StateDiff};
pub use engine::{ReplayEngine, ReplayView};
pub use sessions::{SessionRegistry, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};
pub use timeline::Timeline;
