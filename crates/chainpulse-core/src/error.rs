//! Error types shared across the ChainPulse crates.

use thiserror::Error;

/// Errors produced by connectors, stores, the pipeline and the replay engine.
#[derive(Debug, Error)]
pub enum PulseError {
    /// The upstream connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Upstream unavailable for block {block_number}: {reason}")]
    UpstreamUnavailable { block_number: u64, reason: String },

    #[error("Receipt unavailable for {tx_hash}: {reason}")]
    ReceiptUnavailable { tx_hash: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// A contract interface definition could not be parsed.
    #[error("Invalid interface for {address}: {reason}")]
    InvalidInterface { address: String, reason: String },

    #[error("No stored blocks in range {start_block}..={end_block}")]
    EmptyRange { start_block: u64, end_block: u64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl PulseError {
    /// Returns `true` for errors that end the pipeline (the block feed is gone).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` for per-item upstream failures the pipeline logs and skips.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::ReceiptUnavailable { .. } | Self::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(PulseError::Connection("closed".into()).is_fatal());
        assert!(!PulseError::Connection("closed".into()).is_transient());

        let e = PulseError::UpstreamUnavailable {
            block_number: 7,
            reason: "timeout".into(),
        };
        assert!(e.is_transient());
        assert!(!e.is_fatal());
        assert!(PulseError::NotFound("block 9".into()).is_transient());
        assert!(!PulseError::Persistence("disk full".into()).is_transient());
    }

    #[test]
    fn display_includes_range() {
        let e = PulseError::EmptyRange {
            start_block: 10,
            end_block: 20,
        };
        assert_eq!(e.to_string(), "No stored blocks in range 10..=20");
    }
}
