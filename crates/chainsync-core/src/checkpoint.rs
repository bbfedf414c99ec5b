//! Checkpoint manager: persists the indexer's resumption point.
//!
//! A checkpoint stores the last processed slot and signature. On restart the
//! indexer resumes from `last_processed_slot`; nothing else is consulted.
//!
//! Both the realtime path and the polling path advance the checkpoint, so
//! every store applies writes with an "advance if not lower" rule instead of
//! a blind overwrite. The slot never moves backwards once persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Persisted indexer progress, one row per indexer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Indexer identifier (program / shard key).
    pub indexer_id: String,
    /// Last slot whose transactions were handed to the processor.
    pub last_processed_slot: u64,
    /// Last signature processed at or before `last_processed_slot`.
    pub last_processed_signature: Option<String>,
    /// Whether an indexer instance claims to be running.
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    /// A fresh checkpoint at slot 0.
    pub fn genesis(indexer_id: impl Into<String>) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            last_processed_slot: 0,
            last_processed_signature: None,
            is_running: false,
            started_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply `(slot, signature)` if it does not move the slot backwards.
    ///
    /// Returns `true` if the state changed.
    pub fn advance(&mut self, slot: u64, signature: Option<&str>) -> bool {
        if slot < self.last_processed_slot {
            return false;
        }
        self.last_processed_slot = slot;
        if let Some(sig) = signature {
            self.last_processed_signature = Some(sig.to_string());
        }
        self.updated_at = Utc::now();
        true
    }
}

/// Trait for durable checkpoint storage.
///
/// Implementations include [`MemoryCheckpointStore`] and the Postgres store
/// in `chainsync-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for an indexer, if one exists.
    async fn load(&self, indexer_id: &str) -> Result<Option<CheckpointState>, IndexerError>;

    /// Create the checkpoint at slot 0 if absent (upsert semantics) and
    /// return the stored row.
    async fn initialize(&self, indexer_id: &str) -> Result<CheckpointState, IndexerError>;

    /// Persist `(slot, signature)` unless the stored slot is already higher.
    ///
    /// Returns `true` if the write was applied.
    async fn advance(
        &self,
        indexer_id: &str,
        slot: u64,
        signature: Option<&str>,
    ) -> Result<bool, IndexerError>;

    /// Flip the persisted running flag.
    async fn set_running(&self, indexer_id: &str, running: bool) -> Result<(), IndexerError>;
}

/// Manages checkpoint reads/writes for one indexer and keeps an in-memory
/// mirror of the persisted state.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    indexer_id: String,
    current: Mutex<Option<CheckpointState>>,
}

impl CheckpointManager {
    pub fn new(store: Box<dyn CheckpointStore>, indexer_id: impl Into<String>) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
            current: Mutex::new(None),
        }
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    /// Load the checkpoint, creating it at slot 0 on first boot.
    pub async fn initialize(&self) -> Result<CheckpointState, IndexerError> {
        let state = match self.store.load(&self.indexer_id).await? {
            Some(state) => {
                tracing::info!(
                    indexer = %self.indexer_id,
                    slot = state.last_processed_slot,
                    signature = ?state.last_processed_signature,
                    "Resuming from checkpoint"
                );
                state
            }
            None => {
                tracing::info!(indexer = %self.indexer_id, "No checkpoint found, starting at slot 0");
                self.store.initialize(&self.indexer_id).await?
            }
        };
        *self.lock() = Some(state.clone());
        Ok(state)
    }

    /// The last known state, if [`initialize`](Self::initialize) has run.
    pub fn current(&self) -> Option<CheckpointState> {
        self.lock().clone()
    }

    /// Last processed slot (0 before initialization).
    pub fn last_processed_slot(&self) -> u64 {
        self.lock().as_ref().map(|s| s.last_processed_slot).unwrap_or(0)
    }

    /// Persist progress. Lower slots than the stored one are ignored.
    ///
    /// A storage failure is returned as [`IndexerError::Checkpoint`] and
    /// logged at error level with the slot and signature.
    pub async fn save_progress(
        &self,
        slot: u64,
        signature: Option<&str>,
    ) -> Result<bool, IndexerError> {
        let applied = match self.store.advance(&self.indexer_id, slot, signature).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!(
                    indexer = %self.indexer_id,
                    slot,
                    signature = ?signature,
                    error = %e,
                    "Failed to persist checkpoint progress"
                );
                return Err(IndexerError::Checkpoint {
                    slot,
                    signature: signature.map(str::to_string),
                    reason: e.to_string(),
                });
            }
        };

        let mut guard = self.lock();
        let state = guard.get_or_insert_with(|| CheckpointState::genesis(&self.indexer_id));
        state.advance(slot, signature);
        Ok(applied)
    }

    /// Persist the running flag and mirror it locally.
    pub async fn set_running(&self, running: bool) -> Result<(), IndexerError> {
        self.store.set_running(&self.indexer_id, running).await?;
        if let Some(state) = self.lock().as_mut() {
            state.is_running = running;
            if running {
                state.started_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CheckpointState>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, CheckpointState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, HashMap<String, CheckpointState>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, indexer_id: &str) -> Result<Option<CheckpointState>, IndexerError> {
        Ok(self.data().get(indexer_id).cloned())
    }

    async fn initialize(&self, indexer_id: &str) -> Result<CheckpointState, IndexerError> {
        Ok(self
            .data()
            .entry(indexer_id.to_string())
            .or_insert_with(|| CheckpointState::genesis(indexer_id))
            .clone())
    }

    async fn advance(
        &self,
        indexer_id: &str,
        slot: u64,
        signature: Option<&str>,
    ) -> Result<bool, IndexerError> {
        Ok(self
            .data()
            .entry(indexer_id.to_string())
            .or_insert_with(|| CheckpointState::genesis(indexer_id))
            .advance(slot, signature))
    }

    async fn set_running(&self, indexer_id: &str, running: bool) -> Result<(), IndexerError> {
        if let Some(state) = self.data().get_mut(indexer_id) {
            state.is_running = running;
            if running {
                state.started_at = Some(Utc::now());
            }
            state.updated_at = Utc::now();
        }
        Ok(())
    }
}
