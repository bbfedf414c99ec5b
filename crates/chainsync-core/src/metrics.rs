//! Sync metrics definitions.
//!
//! All metrics use OpenTelemetry conventions and are exported by whatever
//! meter provider the host installs.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};

use crate::discrepancy::DiscrepancyKind;
use crate::runs::RunStatus;

/// Metrics handle for the indexer and reconciler.
#[derive(Clone)]
pub struct SyncMetrics {
    pub processed: Counter<u64>,
    pub failed: Counter<u64>,
    pub lag: Gauge<i64>,
    pub last_processed_slot: Gauge<u64>,
    pub reconcile_runs: Counter<u64>,
    pub discrepancies: Counter<u64>,
}

impl SyncMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            processed: meter
                .u64_counter("chainsync.indexer.processed")
                .with_description("Transactions handed to the processor successfully")
                .build(),
            failed: meter
                .u64_counter("chainsync.indexer.failed")
                .with_description("Slots or transactions that failed to process")
                .build(),
            lag: meter
                .i64_gauge("chainsync.indexer.lag")
                .with_description("Ledger height minus last processed slot")
                .build(),
            last_processed_slot: meter
                .u64_gauge("chainsync.indexer.last_processed_slot")
                .with_description("Last slot persisted in the checkpoint")
                .build(),
            reconcile_runs: meter
                .u64_counter("chainsync.reconcile.runs")
                .with_description("Reconciliation sweeps, by terminal status")
                .build(),
            discrepancies: meter
                .u64_counter("chainsync.reconcile.discrepancies")
                .with_description("Discrepancies found, by type and resolution")
                .build(),
        }
    }

    /// Metrics bound to the global meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter("chainsync"))
    }

    pub fn record_processed(&self, indexer: &str) {
        self.processed
            .add(1, &[KeyValue::new("indexer", indexer.to_string())]);
    }

    pub fn record_failed(&self, indexer: &str, stage: &'static str) {
        self.failed.add(
            1,
            &[
                KeyValue::new("indexer", indexer.to_string()),
                KeyValue::new("stage", stage),
            ],
        );
    }

    pub fn record_progress(&self, indexer: &str, slot: u64, lag: i64) {
        let attrs = [KeyValue::new("indexer", indexer.to_string())];
        self.last_processed_slot.record(slot, &attrs);
        self.lag.record(lag, &attrs);
    }

    pub fn record_run(&self, status: RunStatus) {
        self.reconcile_runs
            .add(1, &[KeyValue::new("status", status.as_str())]);
    }

    pub fn record_discrepancy(&self, kind: DiscrepancyKind, resolved: bool) {
        self.discrepancies.add(
            1,
            &[
                KeyValue::new("type", kind.as_str()),
                KeyValue::new("resolved", resolved),
            ],
        );
    }
}
