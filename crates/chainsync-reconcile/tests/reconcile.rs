//! Reconciliation sweeps against in-process doubles.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use chainsync_cache::{keys, CacheService};
use chainsync_core::discrepancy::{Discrepancy, DiscrepancyKind};
use chainsync_core::error::ReconcileError;
use chainsync_core::ports::{AssetStateReader, TicketAuthority};
use chainsync_core::runs::{MemoryRunStore, RunResults, RunStatus, RunStore};
use chainsync_core::schedule::ManualTicker;
use chainsync_core::ticket::{
    OnChainState, ReconcileQuery, RequestContext, SyncPatch, SyncStatus, TicketBatch,
    TicketRecord, TicketStatus,
};
use chainsync_reconcile::{ReconcileConfig, ReconciliationEngine};

// ─── Doubles ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeAuthority {
    tickets: Mutex<Vec<TicketRecord>>,
    fail_fetch: AtomicBool,
    reject_updates: HashSet<String>,
    updates: Mutex<Vec<(String, SyncPatch, String)>>,
    queries: Mutex<Vec<ReconcileQuery>>,
}

impl FakeAuthority {
    fn with(tickets: Vec<TicketRecord>) -> Arc<Self> {
        Arc::new(Self {
            tickets: Mutex::new(tickets),
            ..Self::default()
        })
    }

    fn updates(&self) -> Vec<(String, SyncPatch)> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(id, patch, _)| (id.clone(), patch.clone()))
            .collect()
    }
}

#[async_trait]
impl TicketAuthority for FakeAuthority {
    async fn tickets_for_reconciliation(
        &self,
        _ctx: &RequestContext,
        query: ReconcileQuery,
    ) -> Result<TicketBatch, ReconcileError> {
        self.queries.lock().unwrap().push(query);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ReconcileError::Authority("ticket service unavailable".into()));
        }
        let tickets: Vec<_> = self.tickets.lock().unwrap().iter().take(query.limit).cloned().collect();
        Ok(TicketBatch {
            count: tickets.len(),
            tickets,
        })
    }

    async fn update_blockchain_sync(
        &self,
        ticket_id: &str,
        patch: &SyncPatch,
        ctx: &RequestContext,
    ) -> Result<(), ReconcileError> {
        if self.reject_updates.contains(ticket_id) {
            return Err(ReconcileError::Authority("HTTP 500".into()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((ticket_id.to_string(), patch.clone(), ctx.tenant_id.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeChain {
    assets: HashMap<String, OnChainState>,
    /// token -> lookup error message
    broken: HashMap<String, String>,
}

impl FakeChain {
    fn with(assets: &[(&str, &str, bool)]) -> Self {
        Self {
            assets: assets
                .iter()
                .map(|(token, owner, burned)| {
                    (
                        token.to_string(),
                        OnChainState {
                            owner: owner.to_string(),
                            burned: *burned,
                        },
                    )
                })
                .collect(),
            broken: HashMap::new(),
        }
    }
}

#[async_trait]
impl AssetStateReader for FakeChain {
    async fn asset_state(&self, token_id: &str) -> Result<Option<OnChainState>, ReconcileError> {
        if let Some(message) = self.broken.get(token_id) {
            return Err(ReconcileError::Chain(message.clone()));
        }
        Ok(self.assets.get(token_id).cloned())
    }
}

fn ticket(id: &str, token: Option<&str>, minted: bool, wallet: Option<&str>, status: TicketStatus) -> TicketRecord {
    TicketRecord {
        id: id.into(),
        token_id: token.map(str::to_string),
        is_minted: minted,
        wallet_address: wallet.map(str::to_string),
        status,
        sync_status: SyncStatus::Pending,
    }
}

fn config() -> ReconcileConfig {
    ReconcileConfig {
        tenant_id: "venue-1".into(),
        ..ReconcileConfig::default()
    }
}

fn engine(
    authority: &Arc<FakeAuthority>,
    chain: FakeChain,
    runs: &Arc<MemoryRunStore>,
) -> ReconciliationEngine {
    ReconciliationEngine::new(config(), authority.clone(), Arc::new(chain), runs.clone())
}

// ─── check_ticket / resolve ───────────────────────────────────────────────────

#[tokio::test]
async fn ownership_mismatch_is_corrected_with_chain_owner() {
    let t = ticket("t1", Some("asset-1"), true, Some("W1"), TicketStatus::Minted);
    let authority = FakeAuthority::with(vec![t.clone()]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::with(&[("asset-1", "W2", false)]), &runs);

    let d = engine.check_ticket(&t).await.unwrap();
    assert_eq!(d.kind(), DiscrepancyKind::OwnershipMismatch);
    assert_eq!(d.field(), "wallet_address");
    assert_eq!((d.db_value(), d.chain_value()), (json!("W1"), json!("W2")));

    let run_id = engine.create_run().await.unwrap();
    let ctx = RequestContext::new("venue-1");
    assert!(engine.resolve_discrepancy(run_id, &t, &d, &ctx).await);

    let updates = authority.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "t1");
    assert_eq!(
        serde_json::to_value(&updates[0].1).unwrap(),
        json!({"syncStatus": "SYNCED", "walletAddress": "W2"})
    );

    let audit = runs.discrepancies();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].run_id, run_id);
    assert_eq!(audit[0].chain_value, json!("W2"));
}

#[tokio::test]
async fn minted_ticket_missing_on_chain_is_token_not_found() {
    let t = ticket("t1", Some("ghost"), true, Some("W1"), TicketStatus::Minted);
    let authority = FakeAuthority::with(vec![]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::default(), &runs);

    let d = engine.check_ticket(&t).await.unwrap();
    assert_eq!(d, Discrepancy::TokenNotFound);
    assert_eq!(d.field(), "is_minted");
    assert_eq!((d.db_value(), d.chain_value()), (json!(true), json!(false)));
}

#[tokio::test]
async fn chain_lookup_errors_are_not_discrepancies() {
    let t = ticket("t1", Some("asset-1"), true, Some("W1"), TicketStatus::Minted);
    let authority = FakeAuthority::with(vec![]);
    let runs = Arc::new(MemoryRunStore::new());
    let mut chain = FakeChain::with(&[("asset-1", "W2", false)]);
    chain.broken.insert("asset-1".into(), "rpc timeout".into());
    let engine = engine(&authority, chain, &runs);

    assert!(engine.check_ticket(&t).await.is_none());
}

#[tokio::test]
async fn failed_lookup_is_stamped_synced_without_correction() {
    // A node without the DAS API answers getAsset with "Method not found".
    let authority = FakeAuthority::with(vec![
        ticket("t1", Some("asset-1"), true, Some("W1"), TicketStatus::Minted),
        ticket("t2", Some("asset-2"), true, Some("W2"), TicketStatus::Minted),
    ]);
    let runs = Arc::new(MemoryRunStore::new());
    let mut chain = FakeChain::default();
    for token in ["asset-1", "asset-2"] {
        chain.broken.insert(
            token.into(),
            "getAsset asset: RPC error -32601: Method not found".into(),
        );
    }
    let engine = engine(&authority, chain, &runs);

    let results = engine.run_reconciliation().await.unwrap();
    assert_eq!(
        results,
        RunResults {
            tickets_checked: 2,
            discrepancies_found: 0,
            discrepancies_resolved: 0,
        }
    );
    assert!(runs.discrepancies().is_empty());

    let updates = authority.updates();
    assert_eq!(updates.len(), 2);
    for (_, patch) in &updates {
        assert_eq!(*patch, SyncPatch::synced());
        assert_eq!(patch.is_minted, None);
    }
}

#[tokio::test]
async fn failed_correction_is_found_but_unresolved() {
    let t = ticket("t1", Some("asset-1"), true, Some("W1"), TicketStatus::Minted);
    let authority = Arc::new(FakeAuthority {
        tickets: Mutex::new(vec![t]),
        reject_updates: HashSet::from(["t1".to_string()]),
        ..FakeAuthority::default()
    });
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::with(&[("asset-1", "W2", false)]), &runs);

    let results = engine.run_reconciliation().await.unwrap();
    assert_eq!(
        results,
        RunResults {
            tickets_checked: 1,
            discrepancies_found: 1,
            discrepancies_resolved: 0,
        }
    );
    assert_eq!(runs.discrepancies().len(), 1);
}

// ─── Sweeps ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_counts_checked_found_and_resolved() {
    let authority = FakeAuthority::with(vec![
        ticket("drifted", Some("asset-1"), true, Some("W1"), TicketStatus::Minted),
        ticket("clean", Some("asset-2"), true, Some("W5"), TicketStatus::Minted),
    ]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(
        &authority,
        FakeChain::with(&[("asset-1", "W2", false), ("asset-2", "W5", false)]),
        &runs,
    );

    let results = engine.run_reconciliation().await.unwrap();
    assert_eq!(
        results,
        RunResults {
            tickets_checked: 2,
            discrepancies_found: 1,
            discrepancies_resolved: 1,
        }
    );

    let recent = runs.recent_runs(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    let run = &recent[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.tickets_checked, 2);
    assert!(run.completed_at.is_some());
    assert!(run.duration_ms.is_some());

    // The clean ticket is only stamped as synced.
    let updates = authority.updates();
    assert_eq!(updates.len(), 2);
    let clean = updates.iter().find(|(id, _)| id == "clean").unwrap();
    assert_eq!(clean.1, SyncPatch::synced());
    let tenants: Vec<_> = authority.updates.lock().unwrap().iter().map(|u| u.2.clone()).collect();
    assert!(tenants.iter().all(|t| t == "venue-1"));

    let query = authority.queries.lock().unwrap()[0];
    assert_eq!((query.limit, query.stale_hours), (100, 1));
}

#[tokio::test]
async fn batch_fetch_failure_fails_the_run_and_propagates() {
    let authority = FakeAuthority::with(vec![]);
    authority.fail_fetch.store(true, Ordering::SeqCst);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::default(), &runs);

    let err = engine.run_reconciliation().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Authority(_)));

    let recent = runs.recent_runs(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, RunStatus::Failed);
    assert!(recent[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("ticket service unavailable"));
}

#[tokio::test]
async fn tokenless_and_unminted_tickets_are_consistent() {
    let authority = FakeAuthority::with(vec![
        ticket("no-token", None, false, None, TicketStatus::Pending),
        ticket("pending", Some("asset-9"), false, None, TicketStatus::Pending),
    ]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::default(), &runs);

    let results = engine.run_reconciliation().await.unwrap();
    assert_eq!((results.tickets_checked, results.discrepancies_found), (2, 0));
    assert!(runs.discrepancies().is_empty());
}

#[tokio::test]
async fn burn_is_written_back_as_status() {
    let authority = FakeAuthority::with(vec![ticket(
        "t1",
        Some("asset-1"),
        true,
        Some("W1"),
        TicketStatus::Used,
    )]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(&authority, FakeChain::with(&[("asset-1", "W1", true)]), &runs);

    engine.run_reconciliation().await.unwrap();
    let updates = authority.updates();
    assert_eq!(
        serde_json::to_value(&updates[0].1).unwrap(),
        json!({"syncStatus": "SYNCED", "status": "BURNED"})
    );
}

// ─── Cache ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chain_state_is_written_through_and_tenant_keys_invalidated() {
    let cache = Arc::new(CacheService::in_memory());
    let authority = FakeAuthority::with(vec![
        ticket("t1", Some("asset-1"), true, Some("W1"), TicketStatus::Minted),
        ticket("t2", Some("asset-2"), true, Some("W7"), TicketStatus::Minted),
    ]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = engine(
        &authority,
        FakeChain::with(&[("asset-1", "W2", false), ("asset-2", "W7", false)]),
        &runs,
    )
    .with_cache(cache.clone());

    let stale = [
        keys::ticket("venue-1", "t1"),
        keys::nft("venue-1", "asset-1"),
        keys::wallet("venue-1", "W1"),
        keys::wallet("venue-1", "W2"),
    ];
    for key in &stale {
        assert!(cache.set(key, &json!("stale"), None).await);
    }

    engine.run_reconciliation().await.unwrap();

    for key in &stale {
        assert!(cache.get::<serde_json::Value>(key).await.is_none(), "{key} survived");
    }
    let clean: OnChainState = cache.get(&keys::asset_state("asset-2")).await.unwrap();
    assert_eq!(clean.owner, "W7");
}

// ─── Scheduling ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_runs_immediately_then_on_each_tick() {
    let authority = FakeAuthority::with(vec![ticket(
        "t1",
        Some("asset-1"),
        true,
        Some("W1"),
        TicketStatus::Minted,
    )]);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = Arc::new(engine(&authority, FakeChain::with(&[("asset-1", "W1", false)]), &runs));

    let (ticker, tick) = ManualTicker::new();
    engine.start_with_ticker(ticker).await;
    assert!(engine.is_running().await);

    // Second start is a no-op.
    let (ignored, _unused) = ManualTicker::new();
    engine.start_with_ticker(ignored).await;

    assert!(tick.tick().await);
    assert_eq!(runs.recent_runs(10).await.unwrap().len(), 2);
    assert!(tick.tick().await);
    assert_eq!(runs.recent_runs(10).await.unwrap().len(), 3);

    engine.stop().await;
    assert!(!engine.is_running().await);
    let recent = runs.recent_runs(10).await.unwrap();
    assert!(recent.iter().all(|r| r.status == RunStatus::Completed));

    // Safe when already stopped.
    engine.stop().await;
}

#[tokio::test]
async fn failed_sweeps_do_not_stop_the_schedule() {
    let authority = FakeAuthority::with(vec![]);
    authority.fail_fetch.store(true, Ordering::SeqCst);
    let runs = Arc::new(MemoryRunStore::new());
    let engine = Arc::new(engine(&authority, FakeChain::default(), &runs));

    let (ticker, tick) = ManualTicker::new();
    engine.start_with_ticker(ticker).await;
    assert!(tick.tick().await);
    authority.fail_fetch.store(false, Ordering::SeqCst);
    assert!(tick.tick().await);
    engine.stop().await;

    let recent = runs.recent_runs(10).await.unwrap();
    let failed = recent.iter().filter(|r| r.status == RunStatus::Failed).count();
    let completed = recent.iter().filter(|r| r.status == RunStatus::Completed).count();
    assert_eq!((failed, completed), (2, 1));
}
