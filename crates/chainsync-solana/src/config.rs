//! Indexer configuration, lifecycle state and status snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chainsync_core::types::Commitment;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used as the checkpoint key).
    #[serde(default = "default_id")]
    pub id: String,
    /// Program whose accounts are subscribed to. `None` = polling only.
    #[serde(default)]
    pub program_id: Option<String>,
    /// Address polled with `getSignaturesForAddress`. Defaults to `program_id`.
    #[serde(default)]
    pub tracked_address: Option<String>,
    #[serde(default)]
    pub commitment: Commitment,
    /// Fallback polling interval (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Signatures fetched per poll.
    #[serde(default = "default_signature_batch_limit")]
    pub signature_batch_limit: usize,
    /// Capacity of the realtime notification queue.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_id() -> String {
    "default".into()
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_signature_batch_limit() -> usize {
    100
}
fn default_notification_buffer() -> usize {
    1_024
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            program_id: None,
            tracked_address: None,
            commitment: Commitment::default(),
            poll_interval_ms: default_poll_interval_ms(),
            signature_batch_limit: default_signature_batch_limit(),
            notification_buffer: default_notification_buffer(),
        }
    }
}

impl IndexerConfig {
    /// The address the polling path follows.
    pub fn polled_address(&self) -> Option<&str> {
        self.tracked_address
            .as_deref()
            .or(self.program_id.as_deref())
    }
}

/// Lifecycle state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    /// Checkpoint not loaded yet.
    Uninitialized,
    /// Checkpoint loaded, not ingesting.
    Initialized,
    /// Subscription and polling loop active.
    Running,
    /// `stop()` in progress; in-flight work is finishing.
    Stopping,
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Health/status snapshot of one indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub indexer_id: String,
    pub state: IndexerState,
    pub last_processed_slot: u64,
    pub last_processed_signature: Option<String>,
    pub lag: i64,
    pub is_running: bool,
    pub processed: u64,
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
}
