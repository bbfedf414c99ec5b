//! Fluent builder for indexer configuration and wiring.
//!
//! # Example
//!
//! ```rust
//! use chainsync_solana::IndexerBuilder;
//! use chainsync_core::types::Commitment;
//!
//! let config = IndexerBuilder::new()
//!     .id("tickets")
//!     .program_id("TixProg1111111111111111111111111111111111111")
//!     .commitment(Commitment::Finalized)
//!     .poll_interval_ms(2_000)
//!     .build_config();
//! assert_eq!(config.polled_address(), config.program_id.as_deref());
//! ```

use std::sync::Arc;

use chainsync_cache::CacheService;
use chainsync_core::checkpoint::CheckpointStore;
use chainsync_core::metrics::SyncMetrics;
use chainsync_core::ports::{LedgerClient, TransactionProcessor};
use chainsync_core::schedule::Ticker;
use chainsync_core::types::Commitment;

use crate::config::IndexerConfig;
use crate::indexer::SolanaIndexer;

/// Fluent builder for `IndexerConfig` and `SolanaIndexer`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    cache: Option<Arc<CacheService>>,
    metrics: Option<SyncMetrics>,
    poll_ticker: Option<Box<dyn Ticker>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the indexer ID (used as the checkpoint key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the program to subscribe to.
    pub fn program_id(mut self, program_id: impl Into<String>) -> Self {
        self.config.program_id = Some(program_id.into());
        self
    }

    /// Poll a different address than the program id.
    pub fn tracked_address(mut self, address: impl Into<String>) -> Self {
        self.config.tracked_address = Some(address.into());
        self
    }

    pub fn commitment(mut self, commitment: Commitment) -> Self {
        self.config.commitment = commitment;
        self
    }

    /// Set the fallback polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set how many signatures each poll fetches.
    pub fn signature_batch_limit(mut self, limit: usize) -> Self {
        self.config.signature_batch_limit = limit;
        self
    }

    pub fn notification_buffer(mut self, size: usize) -> Self {
        self.config.notification_buffer = size;
        self
    }

    /// Invalidate and serve status through this cache.
    pub fn cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drive the polling loop from this ticker instead of a wall-clock
    /// interval. Used by the first `start()` only.
    pub fn poll_ticker(mut self, ticker: impl Ticker + 'static) -> Self {
        self.poll_ticker = Some(Box::new(ticker));
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Wire the indexer with its collaborators.
    pub fn build(
        self,
        ledger: Arc<dyn LedgerClient>,
        processor: Arc<dyn TransactionProcessor>,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> SolanaIndexer {
        SolanaIndexer::assemble(
            self.config,
            ledger,
            processor,
            checkpoints,
            self.cache,
            self.metrics,
            self.poll_ticker,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.id, "default");
        assert_eq!(cfg.poll_interval_ms, 5_000);
        assert_eq!(cfg.signature_batch_limit, 100);
        assert_eq!(cfg.notification_buffer, 1_024);
        assert_eq!(cfg.commitment, Commitment::Confirmed);
        assert!(cfg.polled_address().is_none());
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .id("tickets")
            .program_id("Prog")
            .tracked_address("Vault")
            .poll_interval_ms(1_000)
            .signature_batch_limit(25)
            .build_config();

        assert_eq!(cfg.id, "tickets");
        assert_eq!(cfg.polled_address(), Some("Vault"));
        assert_eq!(cfg.poll_interval_ms, 1_000);
        assert_eq!(cfg.signature_batch_limit, 25);
    }

    #[test]
    fn from_config_keeps_fields() {
        let base = IndexerBuilder::new().id("x").program_id("P").build_config();
        let cfg = IndexerBuilder::from_config(base.clone()).build_config();
        assert_eq!(cfg, base);
    }
}
