//! The checkpoint-backed Solana indexer.
//!
//! # Ingestion paths
//!
//! - **Realtime**: a `programSubscribe` stream. Each notification hands its
//!   slot to [`SolanaIndexer::process_slot`] on a single consumer task.
//! - **Polling**: every `poll_interval_ms`, fetch the newest signatures for
//!   the tracked address and process the ones above the checkpoint, oldest
//!   first. Push delivery is not guaranteed, so this path always runs.
//!
//! Both paths advance the same checkpoint through the monotonic
//! [`CheckpointManager::save_progress`]; racing writes can only move it
//! forward. Delivery is at-least-once; the processor must be idempotent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinHandle;

use chainsync_cache::{keys, CacheInvalidator, CacheService, WarmEntry, WarmSource};
use chainsync_core::checkpoint::{CheckpointManager, CheckpointStore};
use chainsync_core::error::IndexerError;
use chainsync_core::metrics::SyncMetrics;
use chainsync_core::ports::{LedgerClient, SubscriptionId, TransactionProcessor};
use chainsync_core::schedule::{run_every, IntervalTicker, Shutdown, ShutdownSignal, Ticker};
use chainsync_core::stats::{SyncCounters, SyncStats};
use chainsync_core::types::SignatureInfo;

use crate::config::{IndexerConfig, IndexerState, IndexerStatus};

const STATUS_TTL: Duration = Duration::from_secs(10);

pub(crate) struct Inner {
    config: IndexerConfig,
    ledger: Arc<dyn LedgerClient>,
    processor: Arc<dyn TransactionProcessor>,
    checkpoint: CheckpointManager,
    counters: SyncCounters,
    metrics: SyncMetrics,
    cache: Option<Arc<CacheService>>,
    invalidator: Option<CacheInvalidator>,
    state: Mutex<IndexerState>,
}

#[derive(Default)]
struct Tasks {
    shutdown: Option<Shutdown>,
    handles: Vec<JoinHandle<()>>,
    subscription: Option<SubscriptionId>,
}

/// Keeps the local view of a program's ledger activity current and makes
/// that progress crash-resumable.
///
/// Lifecycle: `Uninitialized → Initialized → Running → Stopped`, and
/// `Stopped → Running` again on a later [`start`](Self::start).
pub struct SolanaIndexer {
    inner: Arc<Inner>,
    tasks: tokio::sync::Mutex<Tasks>,
    poll_ticker: Mutex<Option<Box<dyn Ticker>>>,
}

impl SolanaIndexer {
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<dyn LedgerClient>,
        processor: Arc<dyn TransactionProcessor>,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Self {
        Self::assemble(config, ledger, processor, checkpoints, None, None, None)
    }

    pub(crate) fn assemble(
        config: IndexerConfig,
        ledger: Arc<dyn LedgerClient>,
        processor: Arc<dyn TransactionProcessor>,
        checkpoints: Box<dyn CheckpointStore>,
        cache: Option<Arc<CacheService>>,
        metrics: Option<SyncMetrics>,
        poll_ticker: Option<Box<dyn Ticker>>,
    ) -> Self {
        let checkpoint = CheckpointManager::new(checkpoints, config.id.clone());
        let invalidator = cache.clone().map(CacheInvalidator::new);
        Self {
            inner: Arc::new(Inner {
                config,
                ledger,
                processor,
                checkpoint,
                counters: SyncCounters::new(),
                metrics: metrics.unwrap_or_else(SyncMetrics::global),
                cache,
                invalidator,
                state: Mutex::new(IndexerState::Uninitialized),
            }),
            tasks: tokio::sync::Mutex::new(Tasks::default()),
            poll_ticker: Mutex::new(poll_ticker),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> IndexerState {
        self.inner.state()
    }

    /// Load (or create) the checkpoint and compute the initial lag.
    ///
    /// Returns `false` on any failure; the caller must not `start()` then.
    pub async fn initialize(&self) -> bool {
        let inner = &self.inner;
        let checkpoint = match inner.checkpoint.initialize().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(indexer = %inner.config.id, error = %e, "Failed to load checkpoint");
                return false;
            }
        };
        let height = match inner.ledger.get_slot(inner.config.commitment).await {
            Ok(height) => height,
            Err(e) => {
                tracing::error!(indexer = %inner.config.id, error = %e, "Ledger unreachable at startup");
                return false;
            }
        };
        let lag = inner
            .counters
            .set_lag(height, checkpoint.last_processed_slot);
        inner
            .metrics
            .record_progress(&inner.config.id, checkpoint.last_processed_slot, lag);
        inner.set_state(IndexerState::Initialized);

        tracing::info!(
            indexer = %inner.config.id,
            slot = checkpoint.last_processed_slot,
            height,
            lag,
            "Indexer initialized"
        );
        true
    }

    /// Begin ingestion. A second call while running only logs a warning.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let mut tasks = self.tasks.lock().await;
        match self.inner.state() {
            IndexerState::Uninitialized => return Err(IndexerError::NotInitialized),
            IndexerState::Running | IndexerState::Stopping => {
                tracing::warn!(indexer = %self.inner.config.id, "Indexer already running");
                return Ok(());
            }
            IndexerState::Initialized | IndexerState::Stopped => {}
        }

        self.inner.checkpoint.set_running(true).await?;
        self.inner.set_state(IndexerState::Running);

        let shutdown = Shutdown::new();
        self.start_realtime_indexing(&mut tasks, shutdown.signal()).await;
        self.start_polling(&mut tasks, shutdown.signal());
        tasks.shutdown = Some(shutdown);

        tracing::info!(
            indexer = %self.inner.config.id,
            realtime = tasks.subscription.is_some(),
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "Indexer started"
        );
        Ok(())
    }

    async fn start_realtime_indexing(&self, tasks: &mut Tasks, mut shutdown: ShutdownSignal) {
        let inner = &self.inner;
        let Some(program_id) = inner.config.program_id.as_deref() else {
            tracing::info!(indexer = %inner.config.id, "No program id configured, polling only");
            return;
        };

        let mut subscription = match inner
            .ledger
            .subscribe_program(program_id, inner.config.commitment)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(
                    indexer = %inner.config.id,
                    program_id,
                    error = %e,
                    "Program subscription failed, continuing with polling only"
                );
                return;
            }
        };
        tasks.subscription = Some(subscription.id);
        tracing::info!(indexer = %inner.config.id, program_id, subscription = %subscription.id, "Subscribed to program");

        let inner = Arc::clone(inner);
        tasks.handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    notification = subscription.notifications.recv() => {
                        let Some(notification) = notification else { break };
                        tracing::debug!(slot = notification.slot, pubkey = ?notification.pubkey, "Program notification");
                        // Errors are counted and logged inside.
                        let _ = inner.process_slot(notification.slot).await;
                    }
                }
            }
        }));
    }

    fn start_polling(&self, tasks: &mut Tasks, shutdown: ShutdownSignal) {
        let ticker = self
            .poll_ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| Box::new(IntervalTicker::from_millis(self.inner.config.poll_interval_ms)));

        let inner = Arc::clone(&self.inner);
        tasks.handles.push(tokio::spawn(run_every(ticker, shutdown, move || {
            let inner = Arc::clone(&inner);
            async move {
                let _ = inner.poll_once().await;
            }
        })));
    }

    /// Stop ingestion. In-flight work finishes before this returns. Safe to
    /// call when the indexer was never started.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        let mut tasks = self.tasks.lock().await;
        let was = self.inner.state();
        if was == IndexerState::Running {
            self.inner.set_state(IndexerState::Stopping);
        }

        if let Some(shutdown) = tasks.shutdown.take() {
            shutdown.trigger();
        }
        if let Some(id) = tasks.subscription.take() {
            if let Err(e) = self.inner.ledger.unsubscribe(id).await {
                tracing::warn!(indexer = %self.inner.config.id, subscription = %id, error = %e, "Unsubscribe failed");
            }
        }
        for handle in tasks.handles.drain(..) {
            let _ = handle.await;
        }

        if was == IndexerState::Uninitialized {
            return Ok(());
        }
        self.inner.set_state(IndexerState::Stopped);
        self.inner.checkpoint.set_running(false).await?;
        tracing::info!(indexer = %self.inner.config.id, "Indexer stopped");
        Ok(())
    }

    /// Process every successful transaction in `slot`, then advance the
    /// checkpoint to it. Returns how many transactions were processed.
    pub async fn process_slot(&self, slot: u64) -> Result<usize, IndexerError> {
        self.inner.process_slot(slot).await
    }

    /// One polling pass. Returns how many transactions were processed.
    pub async fn poll_once(&self) -> Result<usize, IndexerError> {
        self.inner.poll_once().await
    }

    /// Persist progress directly.
    pub async fn save_progress(&self, slot: u64, signature: Option<&str>) -> Result<bool, IndexerError> {
        self.inner.save_progress(slot, signature).await
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.counters.snapshot()
    }

    pub fn status(&self) -> IndexerStatus {
        self.inner.status()
    }

    /// Status read through the shared cache, when one is configured.
    pub async fn cached_status(&self) -> IndexerStatus {
        self.inner.cached_status().await
    }

    /// Hot keys this indexer can pre-populate.
    pub fn warm_source(&self) -> Arc<dyn WarmSource> {
        Arc::new(IndexerWarmSource {
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Inner {
    fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: IndexerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn record_failed(&self, stage: &'static str) {
        self.counters.record_failed();
        self.metrics.record_failed(&self.config.id, stage);
    }

    async fn process_slot(&self, slot: u64) -> Result<usize, IndexerError> {
        let block = match self.ledger.get_block(slot, self.config.commitment).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                tracing::debug!(slot, "Slot has no block, skipping");
                return Ok(0);
            }
            Err(e) => {
                self.record_failed("slot");
                tracing::warn!(indexer = %self.config.id, slot, error = %e, "Failed to fetch block");
                return Err(e);
            }
        };

        let mut processed = 0;
        let mut last_signature = None;
        for info in block.successful_signatures() {
            if self.handle_signature(&info).await {
                processed += 1;
                last_signature = Some(info.signature);
            }
        }
        self.save_progress(slot, last_signature.as_deref()).await?;
        Ok(processed)
    }

    async fn poll_once(&self) -> Result<usize, IndexerError> {
        let Some(address) = self.config.polled_address() else {
            return Ok(0);
        };
        let commitment = self.config.commitment;

        let fetched = async {
            let height = self.ledger.get_slot(commitment).await?;
            let signatures = self
                .ledger
                .get_signatures_for_address(address, self.config.signature_batch_limit, commitment)
                .await?;
            Ok::<_, IndexerError>((height, signatures))
        };
        let (height, signatures) = match fetched.await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.record_failed("poll");
                tracing::warn!(indexer = %self.config.id, address, error = %e, "Poll failed, retrying next tick");
                return Err(e);
            }
        };

        let pending = pending_signatures(signatures, self.checkpoint.last_processed_slot());
        let mut processed = 0;
        let mut i = 0;
        while i < pending.len() {
            let slot = pending[i].slot;
            let mut last_signature = None;
            while i < pending.len() && pending[i].slot == slot {
                if self.handle_signature(&pending[i]).await {
                    processed += 1;
                    last_signature = Some(pending[i].signature.as_str());
                }
                i += 1;
            }
            self.save_progress(slot, last_signature).await?;
        }

        let lag = self
            .counters
            .set_lag(height, self.checkpoint.last_processed_slot());
        self.metrics
            .record_progress(&self.config.id, self.checkpoint.last_processed_slot(), lag);
        if processed > 0 {
            tracing::debug!(indexer = %self.config.id, processed, lag, "Poll processed signatures");
        }
        Ok(processed)
    }

    /// Forward one signature to the processor. Failures are counted and
    /// logged, never propagated.
    async fn handle_signature(&self, info: &SignatureInfo) -> bool {
        match self.processor.process_transaction(info).await {
            Ok(()) => {
                self.counters.record_processed();
                self.metrics.record_processed(&self.config.id);
                tracing::debug!(signature = %info.signature, slot = info.slot, "Processed transaction");
                if let Some(invalidator) = &self.invalidator {
                    invalidator
                        .on_transaction_processed(&info.signature, info.slot)
                        .await;
                }
                true
            }
            Err(e) => {
                self.record_failed("transaction");
                tracing::warn!(
                    indexer = %self.config.id,
                    signature = %info.signature,
                    slot = info.slot,
                    error = %e,
                    "Transaction processing failed"
                );
                false
            }
        }
    }

    async fn save_progress(&self, slot: u64, signature: Option<&str>) -> Result<bool, IndexerError> {
        let applied = match self.checkpoint.save_progress(slot, signature).await {
            Ok(applied) => applied,
            Err(e) => {
                self.record_failed("checkpoint");
                return Err(e);
            }
        };
        if applied {
            let stats = self.counters.snapshot();
            self.metrics
                .record_progress(&self.config.id, self.checkpoint.last_processed_slot(), stats.lag);
            if let Some(invalidator) = &self.invalidator {
                invalidator.on_sync_status_changed().await;
            }
        }
        Ok(applied)
    }

    fn status(&self) -> IndexerStatus {
        let checkpoint = self.checkpoint.current();
        let stats = self.counters.snapshot();
        let state = self.state();
        IndexerStatus {
            indexer_id: self.config.id.clone(),
            state,
            last_processed_slot: checkpoint.as_ref().map(|c| c.last_processed_slot).unwrap_or(0),
            last_processed_signature: checkpoint
                .as_ref()
                .and_then(|c| c.last_processed_signature.clone()),
            lag: stats.lag,
            is_running: state == IndexerState::Running,
            processed: stats.processed,
            failed: stats.failed,
            started_at: checkpoint.and_then(|c| c.started_at),
        }
    }

    async fn cached_status(&self) -> IndexerStatus {
        let Some(cache) = &self.cache else {
            return self.status();
        };
        cache
            .get_or_set(
                keys::SYNC_STATUS,
                || async { Ok::<_, std::convert::Infallible>(self.status()) },
                Some(STATUS_TTL),
            )
            .await
            .unwrap_or_else(|never| match never {})
    }
}

/// Signatures above `checkpoint` that succeeded on-chain, oldest first.
fn pending_signatures(newest_first: Vec<SignatureInfo>, checkpoint: u64) -> Vec<SignatureInfo> {
    let mut pending: Vec<SignatureInfo> = newest_first
        .into_iter()
        .filter(|s| s.slot > checkpoint && !s.is_failed())
        .collect();
    pending.reverse();
    pending
}

struct IndexerWarmSource {
    inner: Arc<Inner>,
}

impl WarmSource for IndexerWarmSource {
    fn warm_entries(&self, slot_window: u64) -> Vec<WarmEntry> {
        let status = self.inner.status();
        let last = status.last_processed_slot;
        let mut entries = vec![WarmEntry::new(
            keys::SYNC_STATUS,
            async move { serde_json::to_value(status).map_err(|e| e.to_string()) }.boxed(),
        )
        .with_ttl(STATUS_TTL)];

        let first = last.saturating_sub(slot_window.saturating_sub(1));
        for slot in (first..=last).filter(|s| *s > 0) {
            let ledger = Arc::clone(&self.inner.ledger);
            let commitment = self.inner.config.commitment;
            entries.push(WarmEntry::new(
                keys::slot_transactions(slot),
                async move {
                    let block = ledger
                        .get_block(slot, commitment)
                        .await
                        .map_err(|e| e.to_string())?;
                    let signatures: Vec<String> = block
                        .map(|b| b.successful_signatures().into_iter().map(|s| s.signature).collect())
                        .unwrap_or_default();
                    Ok::<_, String>(json!(signatures))
                }
                .boxed(),
            ));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig(signature: &str, slot: u64, failed: bool) -> SignatureInfo {
        SignatureInfo {
            signature: signature.into(),
            slot,
            err: failed.then(|| json!({"InstructionError": [0, "Custom"]})),
            block_time: None,
        }
    }

    #[test]
    fn pending_signatures_are_oldest_first_and_above_checkpoint() {
        let newest_first = vec![
            sig("d", 13, false),
            sig("c", 12, true),
            sig("b", 12, false),
            sig("a", 10, false),
        ];
        let pending: Vec<_> = pending_signatures(newest_first, 10)
            .into_iter()
            .map(|s| s.signature)
            .collect();
        assert_eq!(pending, vec!["b", "d"]);
    }
}
