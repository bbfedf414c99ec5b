//! Cache warming.
//!
//! A [`WarmSource`] describes hot keys together with a lazy fetch for each.
//! The [`CacheWarmer`] runs every fetch, writes the successes and reports
//! the failures without letting one bad entry stop the rest.

use std::sync::Arc;
use std::time::Duration;

use chainsync_core::schedule::{run_every, ShutdownSignal, Ticker};
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::service::CacheService;

/// One key to pre-populate.
pub struct WarmEntry {
    pub key: String,
    pub ttl: Option<Duration>,
    pub fetch: BoxFuture<'static, Result<Value, String>>,
}

impl WarmEntry {
    pub fn new(key: impl Into<String>, fetch: BoxFuture<'static, Result<Value, String>>) -> Self {
        Self {
            key: key.into(),
            ttl: None,
            fetch,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Provider of hot keys.
pub trait WarmSource: Send + Sync {
    /// Entries to warm; `slot_window` bounds how many recent slots to include.
    fn warm_entries(&self, slot_window: u64) -> Vec<WarmEntry>;
}

/// Outcome of one warming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingReport {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl WarmingReport {
    fn merge(&mut self, other: WarmingReport) {
        self.success += other.success;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// Periodically pre-populates hot keys from registered sources.
pub struct CacheWarmer {
    cache: Arc<CacheService>,
    sources: Vec<Arc<dyn WarmSource>>,
}

impl CacheWarmer {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            cache,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn WarmSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Fetch and store `entries` concurrently.
    pub async fn warm(&self, entries: Vec<WarmEntry>) -> WarmingReport {
        let results = join_all(entries.into_iter().map(|entry| {
            let cache = Arc::clone(&self.cache);
            async move {
                match entry.fetch.await {
                    Ok(value) => {
                        if cache.set(&entry.key, &value, entry.ttl).await {
                            Ok(())
                        } else {
                            Err(format!("{}: cache write failed", entry.key))
                        }
                    }
                    Err(e) => Err(format!("{}: {e}", entry.key)),
                }
            }
        }))
        .await;

        let mut report = WarmingReport::default();
        for result in results {
            match result {
                Ok(()) => report.success += 1,
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(e);
                }
            }
        }
        report
    }

    /// One pass over every registered source.
    pub async fn warm_all(&self) -> WarmingReport {
        let window = self.cache.config().warm_slot_window;
        let mut report = WarmingReport::default();
        for source in &self.sources {
            report.merge(self.warm(source.warm_entries(window)).await);
        }
        if report.failed > 0 {
            tracing::warn!(
                success = report.success,
                failed = report.failed,
                errors = ?report.errors,
                "Cache warming finished with failures"
            );
        } else {
            tracing::debug!(success = report.success, "Cache warming finished");
        }
        report
    }

    /// Warm on every tick until shutdown.
    pub fn spawn<T>(self: Arc<Self>, ticker: T, shutdown: ShutdownSignal) -> JoinHandle<()>
    where
        T: Ticker + 'static,
    {
        tokio::spawn(run_every(ticker, shutdown, move || {
            let warmer = Arc::clone(&self);
            async move {
                warmer.warm_all().await;
            }
        }))
    }
}
