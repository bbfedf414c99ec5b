//! Redis cache backend.
//!
//! Enable with the `redis` feature flag. Uses a multiplexed
//! `ConnectionManager` that reconnects on its own; each call clones the
//! handle, so no lock is held across a round-trip.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::error::CacheError;
use crate::store::{KvStore, StoreInfo};

/// Redis-backed key/value store.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    /// Connect to Redis.
    ///
    /// `url` example: `redis://localhost:6379/0`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis cache");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs.max(1))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SETEX")
                .arg(key)
                .arg(ttl_secs.max(1))
                .arg(value)
                .ignore();
        }
        let mut conn = self.conn();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await?)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        // DEL with no arguments is a Redis error.
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        Ok(redis::cmd("DEL")
            .arg(keys)
            .query_async::<_, u64>(&mut conn)
            .await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn();
        Ok(redis::cmd("KEYS")
            .arg(pattern)
            .query_async::<_, Vec<String>>(&mut conn)
            .await?)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async::<_, i64>(&mut conn)
            .await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        Ok(redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs.max(1))
            .query_async::<_, bool>(&mut conn)
            .await?)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, CacheError> {
        let mut conn = self.conn();
        let key_count = redis::cmd("DBSIZE")
            .query_async::<_, u64>(&mut conn)
            .await?;
        let memory = redis::cmd("INFO")
            .arg("memory")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(StoreInfo {
            key_count,
            used_memory_bytes: parse_used_memory(&memory).unwrap_or(0),
        })
    }
}

/// Extract `used_memory:<bytes>` from an `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_memory_section() {
        let reply = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(reply), Some(1_048_576));
        assert_eq!(parse_used_memory("# Memory\r\n"), None);
    }

    /// Requires a running Redis. Run with:
    /// REDIS_URL=redis://localhost:6379 cargo test -p chainsync-cache --features redis -- --ignored
    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn redis_roundtrip() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL not set");
        let store = RedisKvStore::connect(&url).await.unwrap();
        store.set_ex("chainsync:test:k", "v", 30).await.unwrap();
        assert_eq!(
            store.get("chainsync:test:k").await.unwrap().as_deref(),
            Some("v")
        );
        let keys = store.keys("chainsync:test:*").await.unwrap();
        assert!(store.del(&keys).await.unwrap() >= 1);
    }
}
