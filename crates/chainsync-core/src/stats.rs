//! Process-local sync statistics for health reporting.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the indexer's in-memory counters. Reset on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub processed: u64,
    pub failed: u64,
    /// Current ledger height minus the last processed slot.
    pub lag: i64,
    pub start_time: DateTime<Utc>,
}

/// Lock-free counters behind [`SyncStats`].
#[derive(Debug)]
pub struct SyncCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    lag: AtomicI64,
    start_time: DateTime<Utc>,
}

impl SyncCounters {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            lag: AtomicI64::new(0),
            start_time: Utc::now(),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Recompute lag from the ledger height and the checkpoint slot.
    pub fn set_lag(&self, current_slot: u64, last_processed_slot: u64) -> i64 {
        let lag = current_slot as i64 - last_processed_slot as i64;
        self.lag.store(lag, Ordering::Relaxed);
        lag
    }

    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lag: self.lag.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

impl Default for SyncCounters {
    fn default() -> Self {
        Self::new()
    }
}
