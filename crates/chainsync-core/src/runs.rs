//! Reconciliation run records and their store.
//!
//! Every sweep owns exactly one run row. It is created in `running` state and
//! closed exactly once, as `completed` or `failed`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::discrepancy::{Discrepancy, DiscrepancyKind};
use crate::error::ReconcileError;

/// Terminal or in-flight state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ReconcileError::Storage(format!("unknown run status '{other}'"))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResults {
    pub tickets_checked: u64,
    pub discrepancies_found: u64,
    pub discrepancies_resolved: u64,
}

/// One row per reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub tickets_checked: u64,
    pub discrepancies_found: u64,
    pub discrepancies_resolved: u64,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl ReconciliationRun {
    pub fn started(id: Uuid) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            tickets_checked: 0,
            discrepancies_found: 0,
            discrepancies_resolved: 0,
            duration_ms: None,
            error_message: None,
        }
    }
}

/// Audit row for one detected discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyRecord {
    pub run_id: Uuid,
    pub ticket_id: String,
    pub kind: DiscrepancyKind,
    pub field: String,
    pub db_value: Value,
    pub chain_value: Value,
    pub detected_at: DateTime<Utc>,
}

impl DiscrepancyRecord {
    pub fn new(run_id: Uuid, ticket_id: &str, discrepancy: &Discrepancy) -> Self {
        Self {
            run_id,
            ticket_id: ticket_id.to_string(),
            kind: discrepancy.kind(),
            field: discrepancy.field().to_string(),
            db_value: discrepancy.db_value(),
            chain_value: discrepancy.chain_value(),
            detected_at: Utc::now(),
        }
    }
}

/// Persistence for reconciliation runs and the discrepancy audit log.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run in `running` state and return its id.
    async fn create_run(&self) -> Result<Uuid, ReconcileError>;

    /// Close a run as `completed`.
    async fn complete_run(
        &self,
        run_id: Uuid,
        results: RunResults,
        duration_ms: u64,
    ) -> Result<(), ReconcileError>;

    /// Close a run as `failed` with the causing message.
    async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<(), ReconcileError>;

    /// Append a discrepancy to the audit log.
    async fn record_discrepancy(&self, record: DiscrepancyRecord) -> Result<(), ReconcileError>;

    /// Most recent runs, newest first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<ReconciliationRun>, ReconcileError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory run store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<Uuid, ReconciliationRun>>,
    discrepancies: Mutex<Vec<DiscrepancyRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one run by id.
    pub fn run(&self, run_id: Uuid) -> Option<ReconciliationRun> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).get(&run_id).cloned()
    }

    /// All recorded discrepancies, in insertion order.
    pub fn discrepancies(&self) -> Vec<DiscrepancyRecord> {
        self.discrepancies.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn close(
        &self,
        run_id: Uuid,
        apply: impl FnOnce(&mut ReconciliationRun),
    ) -> Result<(), ReconcileError> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| ReconcileError::Storage(format!("run {run_id} not found")))?;
        if run.status != RunStatus::Running {
            return Err(ReconcileError::Storage(format!(
                "run {run_id} already {}",
                run.status
            )));
        }
        apply(run);
        run.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self) -> Result<Uuid, ReconcileError> {
        let id = Uuid::new_v4();
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, ReconciliationRun::started(id));
        Ok(id)
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        results: RunResults,
        duration_ms: u64,
    ) -> Result<(), ReconcileError> {
        self.close(run_id, |run| {
            run.status = RunStatus::Completed;
            run.tickets_checked = results.tickets_checked;
            run.discrepancies_found = results.discrepancies_found;
            run.discrepancies_resolved = results.discrepancies_resolved;
            run.duration_ms = Some(duration_ms);
        })
    }

    async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<(), ReconcileError> {
        self.close(run_id, |run| {
            run.status = RunStatus::Failed;
            run.error_message = Some(error_message.to_string());
            run.duration_ms = Some((Utc::now() - run.started_at).num_milliseconds().max(0) as u64);
        })
    }

    async fn record_discrepancy(&self, record: DiscrepancyRecord) -> Result<(), ReconcileError> {
        self.discrepancies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<ReconciliationRun>, ReconcileError> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_lifecycle_completed() {
        let store = MemoryRunStore::new();
        let id = store.create_run().await.unwrap();
        assert_eq!(store.run(id).unwrap().status, RunStatus::Running);

        let results = RunResults {
            tickets_checked: 2,
            discrepancies_found: 1,
            discrepancies_resolved: 1,
        };
        store.complete_run(id, results, 12).await.unwrap();
        let run = store.run(id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tickets_checked, 2);
        assert_eq!(run.duration_ms, Some(12));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn closed_run_is_immutable() {
        let store = MemoryRunStore::new();
        let id = store.create_run().await.unwrap();
        store.fail_run(id, "authority down").await.unwrap();
        assert!(store.complete_run(id, RunResults::default(), 1).await.is_err());
        let run = store.run(id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("authority down"));
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(s.as_str().parse::<RunStatus>().unwrap(), s);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }
}
