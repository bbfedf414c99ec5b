//! Transport-level error types.

use thiserror::Error;

use chainsync_core::error::{IndexerError, ReconcileError};

use crate::wire::JsonRpcError;

/// Errors from the HTTP and WebSocket ledger clients.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, non-2xx).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The background connection task is gone.
    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` for network-level failures worth retrying on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. } | Self::Closed
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::WebSocket(_) | TransportError::Closed => {
                IndexerError::Subscription(e.to_string())
            }
            other => IndexerError::Rpc(other.to_string()),
        }
    }
}

impl From<TransportError> for ReconcileError {
    fn from(e: TransportError) -> Self {
        ReconcileError::Chain(e.to_string())
    }
}
