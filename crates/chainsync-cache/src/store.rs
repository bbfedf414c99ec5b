//! Key/value backend abstraction.
//!
//! The command set mirrors what the cache layer needs from Redis: string
//! values with a TTL, glob key scans, counters and an `INFO`-style
//! introspection call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Store-reported size figures, used to refresh the cache gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub key_count: u64,
    pub used_memory_bytes: u64,
}

/// Trait for cache backends.
///
/// Implementations: [`MemoryKvStore`](crate::MemoryKvStore) and, with the
/// `redis` feature, `RedisKvStore`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `SETEX`: store `value` for `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    /// Pipelined `SETEX` for many entries sharing one TTL.
    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Keys matching a Redis glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError>;

    /// Set a TTL on an existing key. Returns `false` if the key is missing.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError>;

    /// Drop every key in the store.
    async fn flush(&self) -> Result<(), CacheError>;

    async fn info(&self) -> Result<StoreInfo, CacheError>;
}
