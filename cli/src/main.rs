//! chainsync: Solana indexer and ticket reconciliation service.
//!
//! Usage:
//! ```bash
//! chainsync run --config chainsync.json
//! chainsync reconcile-once
//! chainsync status
//! chainsync info
//! ```

mod config;
mod logging;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::task::JoinHandle;

use chainsync_cache::{CacheService, CacheWarmer, KvStore, MemoryKvStore};
use chainsync_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use chainsync_core::ports::{AssetStateReader, LedgerClient, TransactionProcessor};
use chainsync_core::runs::{MemoryRunStore, RunStore};
use chainsync_core::schedule::{IntervalTicker, Shutdown};
use chainsync_reconcile::{HttpTicketAuthority, ReconciliationEngine};
use chainsync_solana::{
    DedupProcessor, HttpTransactionProcessor, IndexerBuilder, PubsubClient, PubsubConfig,
    RpcClientConfig, SolanaRpcClient,
};
use chainsync_storage::PostgresStorage;

use crate::config::ServiceConfig;
use crate::logging::init_tracing;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let config_path = match parse_config_flag(&args[2..]) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            process::exit(1);
        }
    };

    let result = match command {
        "run" => cmd_run(config_path).await,
        "reconcile-once" => cmd_reconcile_once(config_path).await,
        "status" => cmd_status(config_path).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "chainsync exited with error");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainsync {}", env!("CARGO_PKG_VERSION"));
    println!("Solana indexer and ticket reconciliation service\n");
    println!("USAGE:");
    println!("    chainsync <COMMAND> [--config <path>]\n");
    println!("COMMANDS:");
    println!("    run             Run the indexer, reconciler and cache warmer until Ctrl-C");
    println!("    reconcile-once  Run a single reconciliation sweep and print the results");
    println!("    status          Show the stored checkpoint and recent reconciliation runs");
    println!("    info            Show default configuration");
    println!("    version         Print version");
    println!("    help            Print this help");
}

fn cmd_info() {
    let cfg = ServiceConfig::default();
    println!("ChainSync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default RPC endpoint: {}", cfg.rpc_url);
    println!("  Default commitment: {}", cfg.indexer.commitment);
    println!("  Poll interval: {} ms", cfg.indexer.poll_interval_ms);
    println!("  Signatures per poll: {}", cfg.indexer.signature_batch_limit);
    println!(
        "  Reconciliation: every {} ms, {} tickets/batch, stale after {} h",
        cfg.reconcile.interval_ms, cfg.reconcile.batch_limit, cfg.reconcile.stale_hours
    );
    println!("  Cache TTL: {} s", cfg.cache.default_ttl_secs);
    println!("  Storage backends: memory, PostgreSQL (DATABASE_URL)");
    println!("  Cache backends: memory, Redis (feature: redis)");
}

/// Accepts `--config <path>` / `--config=<path>` anywhere after the command.
fn parse_config_flag(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut iter = args.iter();
    let mut path = None;
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            let value = iter.next().context("--config requires a path")?;
            path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else {
            bail!("Unknown argument: {arg}");
        }
    }
    Ok(path)
}

fn load(path: Option<PathBuf>) -> anyhow::Result<ServiceConfig> {
    let cfg = ServiceConfig::load(path.as_deref())?;
    init_tracing(&cfg.log);
    Ok(cfg)
}

// ─── Wiring ───────────────────────────────────────────────────────────────────

struct Stores {
    checkpoints: Box<dyn CheckpointStore>,
    runs: Arc<dyn RunStore>,
}

async fn open_stores(cfg: &ServiceConfig) -> anyhow::Result<Stores> {
    match &cfg.database_url {
        Some(url) => {
            let storage = PostgresStorage::connect(url)
                .await
                .context("connecting to PostgreSQL")?;
            tracing::info!("Using PostgreSQL storage");
            Ok(Stores {
                checkpoints: Box::new(storage.clone()),
                runs: Arc::new(storage),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set, checkpoints and runs are kept in memory");
            Ok(Stores {
                checkpoints: Box::new(MemoryCheckpointStore::new()),
                runs: Arc::new(MemoryRunStore::new()),
            })
        }
    }
}

async fn open_cache(cfg: &ServiceConfig) -> Arc<CacheService> {
    let store: Arc<dyn KvStore> = match &cfg.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => match chainsync_cache::RedisKvStore::connect(url).await {
            Ok(store) => {
                tracing::info!("Using Redis cache");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory cache");
                Arc::new(MemoryKvStore::new())
            }
        },
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL set but built without the `redis` feature, using in-memory cache");
            Arc::new(MemoryKvStore::new())
        }
        None => Arc::new(MemoryKvStore::new()),
    };
    Arc::new(CacheService::new(store, cfg.cache.clone()))
}

fn rpc_client(cfg: &ServiceConfig, with_pubsub: bool) -> anyhow::Result<Arc<SolanaRpcClient>> {
    let rpc_config = RpcClientConfig {
        request_timeout: Duration::from_millis(cfg.request_timeout_ms),
    };
    let mut client = SolanaRpcClient::new(cfg.rpc_url.clone(), rpc_config)
        .context("building Solana RPC client")?;
    if with_pubsub {
        if let Some(ws_url) = &cfg.ws_url {
            let pubsub_config = PubsubConfig {
                notification_buffer: cfg.indexer.notification_buffer,
                ..PubsubConfig::default()
            };
            client = client.with_pubsub(PubsubClient::connect(ws_url.clone(), pubsub_config));
        }
    }
    Ok(Arc::new(client))
}

fn reconciliation_engine(
    cfg: &ServiceConfig,
    chain: Arc<dyn AssetStateReader>,
    runs: Arc<dyn RunStore>,
) -> anyhow::Result<Option<ReconciliationEngine>> {
    let Some(url) = &cfg.ticket_service_url else {
        return Ok(None);
    };
    let authority = HttpTicketAuthority::new(
        url.clone(),
        cfg.ticket_service_token.clone(),
        Duration::from_millis(cfg.request_timeout_ms),
    )
    .context("building ticket service client")?;
    Ok(Some(ReconciliationEngine::new(
        cfg.reconcile.clone(),
        Arc::new(authority),
        chain,
        runs,
    )))
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn cmd_run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = load(config_path)?;
    let processor_url = cfg
        .processor_url
        .clone()
        .context("PROCESSOR_URL is required for `run`")?;

    let stores = open_stores(&cfg).await?;
    let cache = open_cache(&cfg).await;
    let rpc = rpc_client(&cfg, true)?;

    let http_processor =
        HttpTransactionProcessor::new(processor_url, Duration::from_millis(cfg.request_timeout_ms))?;
    let processor: Arc<dyn TransactionProcessor> =
        Arc::new(DedupProcessor::new(Arc::new(http_processor)));
    let ledger: Arc<dyn LedgerClient> = rpc.clone();

    let indexer = IndexerBuilder::from_config(cfg.indexer.clone())
        .cache(Arc::clone(&cache))
        .build(ledger, processor, stores.checkpoints);
    if !indexer.initialize().await {
        bail!("indexer `{}` failed to initialize", cfg.indexer.id);
    }
    indexer.start().await?;

    let engine = match reconciliation_engine(&cfg, rpc.clone(), stores.runs)? {
        Some(engine) => {
            let engine = Arc::new(engine.with_cache(Arc::clone(&cache)));
            engine.start().await;
            Some(engine)
        }
        None => {
            tracing::warn!("TICKET_SERVICE_URL not set, reconciliation disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    let warmer = Arc::new(CacheWarmer::new(Arc::clone(&cache)).with_source(indexer.warm_source()));
    let background: Vec<JoinHandle<()>> = vec![
        warmer.spawn(
            IntervalTicker::from_millis(cfg.cache.warm_interval_ms),
            shutdown.signal(),
        ),
        cache.spawn_metrics_refresh(
            IntervalTicker::from_millis(cfg.cache.metrics_refresh_ms),
            shutdown.signal(),
        ),
    ];

    tracing::info!(indexer_id = %cfg.indexer.id, rpc_url = %cfg.rpc_url, "chainsync running");
    wait_for_signal().await;
    tracing::info!("Shutdown requested");

    if let Err(e) = indexer.stop().await {
        tracing::error!(error = %e, "Indexer did not stop cleanly");
    }
    if let Some(engine) = &engine {
        engine.stop().await;
    }
    shutdown.trigger();
    for handle in background {
        let _ = handle.await;
    }
    tracing::info!("chainsync stopped");
    Ok(())
}

async fn cmd_reconcile_once(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = load(config_path)?;
    let stores = open_stores(&cfg).await?;
    let rpc = rpc_client(&cfg, false)?;
    let Some(engine) = reconciliation_engine(&cfg, rpc, stores.runs)? else {
        bail!("TICKET_SERVICE_URL is required for `reconcile-once`");
    };
    let results = engine.run_reconciliation().await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn cmd_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = load(config_path)?;
    if cfg.database_url.is_none() {
        bail!("DATABASE_URL is required for `status`");
    }
    let stores = open_stores(&cfg).await?;
    let checkpoint = stores.checkpoints.load(&cfg.indexer.id).await?;
    let runs = stores.runs.recent_runs(10).await?;
    let status = serde_json::json!({
        "indexer_id": cfg.indexer.id,
        "checkpoint": checkpoint,
        "recent_runs": runs,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn config_flag_forms() {
        assert_eq!(parse_config_flag(&args(&[])).unwrap(), None);
        assert_eq!(
            parse_config_flag(&args(&["--config", "a.json"])).unwrap(),
            Some(PathBuf::from("a.json"))
        );
        assert_eq!(
            parse_config_flag(&args(&["--config=b.json"])).unwrap(),
            Some(PathBuf::from("b.json"))
        );
        assert!(parse_config_flag(&args(&["--config"])).is_err());
        assert!(parse_config_flag(&args(&["--verbose"])).is_err());
    }

    #[tokio::test]
    async fn memory_stores_without_database_url() {
        let cfg = ServiceConfig::default();
        let stores = open_stores(&cfg).await.unwrap();
        assert!(stores.checkpoints.load("default").await.unwrap().is_none());
        assert!(stores.runs.recent_runs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconciliation_disabled_without_ticket_service() {
        let cfg = ServiceConfig::default();
        let rpc = rpc_client(&cfg, false).unwrap();
        let runs: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
        assert!(reconciliation_engine(&cfg, rpc, runs).unwrap().is_none());
    }
}
