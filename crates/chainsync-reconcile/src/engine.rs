//! The reconciliation engine.
//!
//! Each sweep audits a bounded batch of stale tickets against on-chain state
//! and heals drift, with the chain as the authority. Every sweep owns exactly
//! one run row that ends as `completed` or `failed`.
//!
//! Failure scope:
//! - batch fetch fails: the whole sweep fails (`fail_run`) and the error is
//!   returned to the caller
//! - one ticket's chain lookup fails: logged, no discrepancy, and the ticket
//!   is stamped synced like a consistent one
//! - one ticket's correction fails: logged and counted as unresolved

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use uuid::Uuid;

use chainsync_cache::{keys, CacheInvalidator, CacheService};
use chainsync_core::discrepancy::Discrepancy;
use chainsync_core::error::ReconcileError;
use chainsync_core::metrics::SyncMetrics;
use chainsync_core::ports::{AssetStateReader, TicketAuthority};
use chainsync_core::runs::{DiscrepancyRecord, ReconciliationRun, RunResults, RunStatus, RunStore};
use chainsync_core::schedule::{run_every, IntervalTicker, Shutdown, Ticker};
use chainsync_core::ticket::{ReconcileQuery, RequestContext, SyncPatch, TicketRecord};

use crate::classify::classify;
use crate::config::ReconcileConfig;

struct Sweeper {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Periodic audit-and-heal over ticket records.
pub struct ReconciliationEngine {
    config: ReconcileConfig,
    authority: Arc<dyn TicketAuthority>,
    chain: Arc<dyn AssetStateReader>,
    runs: Arc<dyn RunStore>,
    cache: Option<Arc<CacheService>>,
    invalidator: Option<CacheInvalidator>,
    metrics: SyncMetrics,
    sweeper: tokio::sync::Mutex<Option<Sweeper>>,
}

impl ReconciliationEngine {
    pub fn new(
        config: ReconcileConfig,
        authority: Arc<dyn TicketAuthority>,
        chain: Arc<dyn AssetStateReader>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            config,
            authority,
            chain,
            runs,
            cache: None,
            invalidator: None,
            metrics: SyncMetrics::global(),
            sweeper: tokio::sync::Mutex::new(None),
        }
    }

    /// Write chain state through to `cache` and invalidate corrected tickets.
    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.invalidator = Some(CacheInvalidator::new(Arc::clone(&cache)));
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    // ─── Scheduling ───────────────────────────────────────────────────────────

    /// Run one sweep now, then one every `interval_ms`. No-op if already
    /// started.
    pub async fn start(self: &Arc<Self>) {
        let ticker = IntervalTicker::from_millis(self.config.interval_ms);
        self.start_with_ticker(ticker).await;
    }

    /// Like [`start`](Self::start), with sweeps after the first driven by
    /// `ticker`.
    pub async fn start_with_ticker<T>(self: &Arc<Self>, ticker: T)
    where
        T: Ticker + 'static,
    {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            tracing::warn!("Reconciliation engine already running");
            return;
        }
        tracing::info!(
            interval_ms = self.config.interval_ms,
            batch_limit = self.config.batch_limit,
            stale_hours = self.config.stale_hours,
            "Starting reconciliation engine"
        );

        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = engine.run_reconciliation().await;
            run_every(ticker, signal, move || {
                let engine = Arc::clone(&engine);
                async move {
                    // The run row already carries the failure.
                    let _ = engine.run_reconciliation().await;
                }
            })
            .await;
        });
        *sweeper = Some(Sweeper { shutdown, handle });
    }

    /// Stop scheduling sweeps. A sweep in progress runs to completion first.
    pub async fn stop(&self) {
        let Some(sweeper) = self.sweeper.lock().await.take() else {
            return;
        };
        sweeper.shutdown.trigger();
        let _ = sweeper.handle.await;
        tracing::info!("Reconciliation engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.sweeper.lock().await.is_some()
    }

    // ─── Sweep ────────────────────────────────────────────────────────────────

    /// Insert a run row in `running` state.
    pub async fn create_run(&self) -> Result<Uuid, ReconcileError> {
        let run_id = self.runs.create_run().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to create reconciliation run");
            e
        })?;
        tracing::info!(%run_id, "Reconciliation run started");
        Ok(run_id)
    }

    /// One full sweep. The run row is always closed before this returns.
    pub async fn run_reconciliation(&self) -> Result<RunResults, ReconcileError> {
        let started = Instant::now();
        let run_id = self.create_run().await?;
        let ctx = RequestContext::new(&self.config.tenant_id);

        let results = match self.sweep(run_id, &ctx).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(%run_id, trace_id = %ctx.trace_id, error = %e, "Reconciliation sweep failed");
                self.close_failed(run_id, &e.to_string()).await;
                return Err(e);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.runs.complete_run(run_id, results, duration_ms).await {
            tracing::error!(%run_id, error = %e, "Failed to complete reconciliation run");
            self.close_failed(run_id, &e.to_string()).await;
            return Err(e);
        }
        self.metrics.record_run(RunStatus::Completed);

        tracing::info!(
            %run_id,
            tickets_checked = results.tickets_checked,
            discrepancies_found = results.discrepancies_found,
            discrepancies_resolved = results.discrepancies_resolved,
            duration_ms,
            "Reconciliation run completed"
        );
        Ok(results)
    }

    async fn close_failed(&self, run_id: Uuid, message: &str) {
        self.metrics.record_run(RunStatus::Failed);
        if let Err(e) = self.runs.fail_run(run_id, message).await {
            tracing::error!(%run_id, error = %e, "Failed to mark reconciliation run as failed");
        }
    }

    async fn sweep(&self, run_id: Uuid, ctx: &RequestContext) -> Result<RunResults, ReconcileError> {
        let tickets = self.get_tickets_to_reconcile(ctx).await?;
        let mut results = RunResults::default();

        for ticket in &tickets {
            results.tickets_checked += 1;
            match self.check_ticket(ticket).await {
                None => {
                    self.mark_ticket_reconciled(&ticket.id, ctx).await;
                }
                Some(discrepancy) => {
                    results.discrepancies_found += 1;
                    if self.resolve_discrepancy(run_id, ticket, &discrepancy, ctx).await {
                        results.discrepancies_resolved += 1;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Fetch the batch of tickets due for an audit.
    pub async fn get_tickets_to_reconcile(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<TicketRecord>, ReconcileError> {
        let query = ReconcileQuery {
            limit: self.config.batch_limit,
            stale_hours: self.config.stale_hours,
        };
        let batch = self.authority.tickets_for_reconciliation(ctx, query).await?;
        tracing::debug!(count = batch.count, fetched = batch.tickets.len(), "Fetched tickets to reconcile");
        Ok(batch.tickets)
    }

    /// Compare one ticket with fresh chain state. Lookup failures are logged
    /// and treated as "no discrepancy", so the sweep stamps the ticket as
    /// synced without correcting it.
    pub async fn check_ticket(&self, ticket: &TicketRecord) -> Option<Discrepancy> {
        let token_id = ticket.token_id.as_deref()?;

        let chain = match self.chain.asset_state(token_id).await {
            Ok(chain) => chain,
            Err(e) => {
                tracing::warn!(ticket_id = %ticket.id, token_id, error = %e, "Chain lookup failed, treating ticket as consistent");
                return None;
            }
        };

        if let (Some(cache), Some(state)) = (&self.cache, &chain) {
            cache
                .set(
                    &keys::asset_state(token_id),
                    state,
                    Some(Duration::from_secs(self.config.asset_cache_ttl_secs)),
                )
                .await;
        }

        let discrepancy = classify(ticket, chain.as_ref());
        if let Some(d) = &discrepancy {
            tracing::info!(
                ticket_id = %ticket.id,
                token_id,
                kind = %d.kind(),
                field = d.field(),
                db_value = %d.db_value(),
                chain_value = %d.chain_value(),
                "Discrepancy detected"
            );
        }
        discrepancy
    }

    /// Stamp a consistent ticket as synced. Best-effort: failures are logged
    /// and reported as `false`.
    pub async fn mark_ticket_reconciled(&self, ticket_id: &str, ctx: &RequestContext) -> bool {
        match self
            .authority
            .update_blockchain_sync(ticket_id, &SyncPatch::synced(), ctx)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(ticket_id, trace_id = %ctx.trace_id, error = %e, "Failed to mark ticket reconciled");
                false
            }
        }
    }

    /// Record the discrepancy against the run and push the chain value back
    /// to the ticket authority. Returns `true` if both writes succeeded.
    pub async fn resolve_discrepancy(
        &self,
        run_id: Uuid,
        ticket: &TicketRecord,
        discrepancy: &Discrepancy,
        ctx: &RequestContext,
    ) -> bool {
        let resolved = match self.try_resolve(run_id, ticket, discrepancy, ctx).await {
            Ok(()) => {
                tracing::info!(%run_id, ticket_id = %ticket.id, kind = %discrepancy.kind(), "Discrepancy resolved");
                true
            }
            Err(e) => {
                tracing::warn!(
                    %run_id,
                    ticket_id = %ticket.id,
                    kind = %discrepancy.kind(),
                    error = %e,
                    "Failed to resolve discrepancy"
                );
                false
            }
        };
        self.metrics.record_discrepancy(discrepancy.kind(), resolved);
        resolved
    }

    async fn try_resolve(
        &self,
        run_id: Uuid,
        ticket: &TicketRecord,
        discrepancy: &Discrepancy,
        ctx: &RequestContext,
    ) -> Result<(), ReconcileError> {
        self.runs
            .record_discrepancy(DiscrepancyRecord::new(run_id, &ticket.id, discrepancy))
            .await?;

        let patch = discrepancy.correction();
        self.authority
            .update_blockchain_sync(&ticket.id, &patch, ctx)
            .await?;

        if let Some(invalidator) = &self.invalidator {
            invalidator.on_ticket_updated(&ctx.tenant_id, &ticket.id).await;
            if let Some(token_id) = ticket.token_id.as_deref() {
                invalidator
                    .on_nft_ownership_changed(
                        &ctx.tenant_id,
                        token_id,
                        ticket.wallet_address.as_deref(),
                        patch.wallet_address.as_deref(),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Recent runs for the health surface, newest first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<ReconciliationRun>, ReconcileError> {
        self.runs.recent_runs(limit).await
    }
}
