//! Typed cache service.
//!
//! Every public method is infallible from the caller's point of view: a
//! backend or decoding failure is logged, counted and reported as a miss
//! (or `false` for writes). Callers must always be able to fall back to
//! the authoritative source.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chainsync_core::schedule::{run_every, ShutdownSignal, Ticker};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::memory::MemoryKvStore;
use crate::metrics::{CacheMetrics, CacheStats, CacheStatsSnapshot};
use crate::store::{KvStore, StoreInfo};

/// Cache handle shared by the indexer, the reconciler and query paths.
pub struct CacheService {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
    metrics: CacheMetrics,
    stats: CacheStats,
}

impl CacheService {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self::with_metrics(store, config, CacheMetrics::global())
    }

    pub fn with_metrics(store: Arc<dyn KvStore>, config: CacheConfig, metrics: CacheMetrics) -> Self {
        Self {
            store,
            config,
            metrics,
            stats: CacheStats::default(),
        }
    }

    /// A service over a fresh [`MemoryKvStore`] with default config.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()), CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Parsed value at `key`, or `None` on miss, backend error or corrupt data.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.timed("get", self.store.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(_) => {
                self.miss("get");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.stats.hit();
                self.metrics.record_hit("get");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt cache entry, treating as miss");
                self.fail("get");
                self.miss("get");
                // Drop it so the next read-through repopulates.
                let _ = self.store.del(&[key.to_string()]).await;
                None
            }
        }
    }

    /// Parsed values for many keys in one round-trip, in key order.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let raws = match self.timed("mget", self.store.mget(keys)).await {
            Ok(raws) => raws,
            Err(_) => vec![None; keys.len()],
        };
        raws.into_iter()
            .zip(keys)
            .map(|(raw, key)| {
                let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                        self.fail("mget");
                        None
                    }
                });
                if value.is_some() {
                    self.stats.hit();
                    self.metrics.record_hit("mget");
                } else {
                    self.miss("mget");
                }
                value
            })
            .collect()
    }

    /// Store `value` under `key`. `ttl` defaults to the configured TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to serialize cache value");
                self.fail("set");
                return false;
            }
        };
        self.timed("set", self.store.set_ex(key, &raw, self.ttl_secs(ttl)))
            .await
            .is_ok()
    }

    /// Store many entries in one pipelined write.
    pub async fn set_many<T: Serialize>(&self, entries: &[(String, T)], ttl: Option<Duration>) -> bool {
        let encoded: Result<Vec<(String, String)>, serde_json::Error> = entries
            .iter()
            .map(|(k, v)| serde_json::to_string(v).map(|raw| (k.clone(), raw)))
            .collect();
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize cache batch");
                self.fail("set_many");
                return false;
            }
        };
        self.timed("set_many", self.store.set_many_ex(&encoded, self.ttl_secs(ttl)))
            .await
            .is_ok()
    }

    /// Read-through: on miss, call `fetch`, cache its result and return it.
    ///
    /// Concurrent misses for the same key may each call `fetch`. Errors from
    /// `fetch` are returned unchanged and nothing is cached.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn del(&self, key: &str) -> bool {
        self.timed("del", self.store.del(&[key.to_string()]))
            .await
            .is_ok()
    }

    /// Delete several exact keys, returning how many existed.
    pub async fn del_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        self.timed("del", self.store.del(keys)).await.unwrap_or(0)
    }

    /// Delete every key matching a glob pattern. Returns the number removed.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        self.try_del_pattern(pattern).await.unwrap_or(0)
    }

    pub(crate) async fn try_del_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys = self.timed("del_pattern", self.store.keys(pattern)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.timed("del_pattern", self.store.del(&keys)).await?;
        tracing::debug!(pattern, removed, "Invalidated cache keys");
        Ok(removed)
    }

    /// Increment a counter; a freshly created counter gets `ttl`.
    pub async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> Option<i64> {
        let value = self.timed("incr", self.store.incr(key, by)).await.ok()?;
        if value == by {
            let _ = self
                .timed("expire", self.store.expire(key, self.ttl_secs(ttl)))
                .await;
        }
        Some(value)
    }

    /// Drop every entry in the store.
    pub async fn clear(&self) -> bool {
        let ok = self.timed("clear", self.store.flush()).await.is_ok();
        if ok {
            tracing::info!("Cache cleared");
        }
        ok
    }

    /// Refresh the key-count and memory gauges from the store.
    pub async fn refresh_store_gauges(&self) -> Option<StoreInfo> {
        let info = self.timed("info", self.store.info()).await.ok()?;
        self.metrics.record_store_info(info);
        self.stats.store_info(info);
        Some(info)
    }

    /// Refresh the store gauges on every tick until shutdown.
    pub fn spawn_metrics_refresh<T>(self: &Arc<Self>, ticker: T, shutdown: ShutdownSignal) -> JoinHandle<()>
    where
        T: Ticker + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(run_every(ticker, shutdown, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.refresh_store_gauges().await;
            }
        }))
    }

    fn ttl_secs(&self, ttl: Option<Duration>) -> u64 {
        ttl.map(|d| d.as_secs().max(1))
            .unwrap_or(self.config.default_ttl_secs)
    }

    fn miss(&self, operation: &'static str) {
        self.stats.miss();
        self.metrics.record_miss(operation);
    }

    fn fail(&self, operation: &'static str) {
        self.stats.error();
        self.metrics.record_error(operation);
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics
            .record_duration(operation, start.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &result {
            tracing::warn!(operation, error = %e, "Cache operation failed");
            self.fail(operation);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainsync_core::schedule::{ManualTicker, Shutdown};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Owner {
        wallet: String,
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = CacheService::in_memory();
        let owner = Owner { wallet: "W1".into() };
        assert!(cache.set("tenant:T:nft:a", &owner, None).await);
        assert_eq!(cache.get::<Owner>("tenant:T:nft:a").await, Some(owner));
        assert_eq!(cache.get::<Owner>("tenant:T:nft:b").await, None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn tenant_purge_hides_previous_values() {
        let cache = CacheService::in_memory();
        for key in ["tenant:T:wallet:W1", "tenant:T:nft:a", "tenant:U:nft:a", "sync:status"] {
            cache.set(key, &1u32, None).await;
        }
        assert_eq!(cache.del_pattern("tenant:T:*").await, 2);

        assert_eq!(cache.get::<u32>("tenant:T:wallet:W1").await, None);
        assert_eq!(cache.get::<u32>("tenant:T:nft:a").await, None);
        assert_eq!(cache.get::<u32>("tenant:U:nft:a").await, Some(1));
        assert_eq!(cache.get::<u32>("sync:status").await, Some(1));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryKvStore::new());
        store.set_ex("k", "{not json", 60).await.unwrap();
        let cache = CacheService::new(store.clone(), CacheConfig::default());

        assert_eq!(cache.get::<Owner>("k").await, None);
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_set_reads_through_once() {
        let cache = CacheService::in_memory();
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let v: u64 = cache
                .get_or_set(
                    "slot:5:transactions",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(42)
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_set_does_not_cache_fetch_errors() {
        let cache = CacheService::in_memory();
        let res: Result<u64, String> = cache
            .get_or_set("k", || async { Err("upstream down".to_string()) }, None)
            .await;
        assert_eq!(res.unwrap_err(), "upstream down");
        assert_eq!(cache.get::<u64>("k").await, None);
    }

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_ex(&self, _: &str, _: &str, _: u64) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_many_ex(&self, _: &[(String, String)], _: u64) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn mget(&self, _: &[String]) -> Result<Vec<Option<String>>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn del(&self, _: &[String]) -> Result<u64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn keys(&self, _: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn incr(&self, _: &str, _: i64) -> Result<i64, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn expire(&self, _: &str, _: u64) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn flush(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn info(&self) -> Result<StoreInfo, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn backend_outage_degrades_to_misses() {
        let cache = CacheService::new(Arc::new(DownStore), CacheConfig::default());
        assert_eq!(cache.get::<u32>("k").await, None);
        assert!(!cache.set("k", &1u32, None).await);
        assert_eq!(cache.del_pattern("tenant:T:*").await, 0);
        assert!(!cache.clear().await);
        assert_eq!(cache.get_many::<u32>(&["a".into(), "b".into()]).await, vec![None, None]);

        let v: u32 = cache
            .get_or_set("k", || async { Ok::<_, String>(7) }, None)
            .await
            .unwrap();
        assert_eq!(v, 7);
        assert!(cache.stats().errors >= 5);
    }

    #[tokio::test]
    async fn incr_sets_ttl_on_create() {
        let cache = CacheService::in_memory();
        assert_eq!(cache.incr("rate:x", 1, Some(Duration::from_secs(60))).await, Some(1));
        assert_eq!(cache.incr("rate:x", 1, None).await, Some(2));
    }

    #[tokio::test]
    async fn metrics_refresh_loop_updates_gauges() {
        let cache = Arc::new(CacheService::in_memory());
        cache.set("a", &1u8, None).await;
        cache.set("b", &2u8, None).await;

        let (ticker, handle) = ManualTicker::new();
        let shutdown = Shutdown::new();
        let task = cache.spawn_metrics_refresh(ticker, shutdown.signal());

        handle.tick().await;
        assert_eq!(cache.stats().key_count, 2);
        assert!(cache.stats().memory_bytes > 0);

        shutdown.trigger();
        task.await.unwrap();
    }
}
