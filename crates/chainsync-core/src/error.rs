//! Error types for the sync pipeline.

use thiserror::Error;

/// Errors that can occur while indexing the ledger.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Checkpoint progress could not be persisted. Losing a checkpoint write
    /// means gaps or reprocessing on restart, so this is never swallowed.
    #[error("Checkpoint write failed at slot {slot} (signature {signature:?}): {reason}")]
    Checkpoint {
        slot: u64,
        signature: Option<String>,
        reason: String,
    },

    #[error("Transaction processor failed for '{signature}': {reason}")]
    Processor { signature: String, reason: String },

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Indexer has not been initialized")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for transient-external failures that the next tick retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Subscription(_))
    }

    /// Returns `true` if this error means checkpoint progress was not saved.
    pub fn is_checkpoint_loss(&self) -> bool {
        matches!(self, Self::Checkpoint { .. })
    }
}

/// Errors that can occur during a reconciliation sweep.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Ticket authority error: {0}")]
    Authority(String),

    #[error("Chain lookup error: {0}")]
    Chain(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IndexerError::Rpc("timeout".into()).is_transient());
        assert!(IndexerError::Subscription("closed".into()).is_transient());
        assert!(!IndexerError::Storage("disk".into()).is_transient());
    }

    #[test]
    fn checkpoint_error_message_carries_context() {
        let err = IndexerError::Checkpoint {
            slot: 42,
            signature: Some("5sig".into()),
            reason: "connection reset".into(),
        };
        assert!(err.is_checkpoint_loss());
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("5sig"));
        assert!(msg.contains("connection reset"));
    }
}
