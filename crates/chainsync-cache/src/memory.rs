//! In-memory cache backend.
//!
//! Expiry is lazy: an expired entry is dropped the next time it is touched
//! or scanned. Uses `tokio::time::Instant`, so paused-clock tests can
//! advance past a TTL without sleeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::store::{KvStore, StoreInfo};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory key/value store with Redis-like semantics.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if data.get(key).is_some_and(|e| !e.is_live(now)) {
            data.remove(key);
        }
        data.get_mut(key)
    }
}

fn deadline(ttl_secs: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_secs(ttl_secs.max(1)))
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut data = self.data();
        Ok(Self::live(&mut data, key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.data().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let mut data = self.data();
        for (key, value) in entries {
            data.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at: deadline(ttl_secs),
                },
            );
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut data = self.data();
        Ok(keys
            .iter()
            .map(|k| Self::live(&mut data, k).map(|e| e.value.clone()))
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut data = self.data();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = data.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut data = self.data();
        data.retain(|_, e| e.is_live(now));
        Ok(data
            .keys()
            .filter(|k| key_matches(pattern, k))
            .cloned()
            .collect())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let mut data = self.data();
        match Self::live(&mut data, key) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheError::Backend(format!("value at '{key}' is not an integer"))
                })?;
                let next = current.checked_add(by).ok_or_else(|| {
                    CacheError::Backend(format!("increment or decrement would overflow at '{key}'"))
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: by.to_string(),
                        expires_at: None,
                    },
                );
                Ok(by)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, CacheError> {
        let mut data = self.data();
        match Self::live(&mut data, key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl_secs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.data().clear();
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, CacheError> {
        let now = Instant::now();
        let data = self.data();
        let mut info = StoreInfo::default();
        for (key, entry) in data.iter().filter(|(_, e)| e.is_live(now)) {
            info.key_count += 1;
            info.used_memory_bytes += (key.len() + entry.value.len()) as u64;
        }
        Ok(info)
    }
}

/// Redis `KEYS`-style match. Keys never contain `/`, so `glob_match`'s
/// path-segment rules coincide with Redis; only the `[^x]` negation is
/// rewritten to the `[!x]` form.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    if pattern.contains("[^") {
        glob_match::glob_match(&pattern.replace("[^", "[!"), key)
    } else {
        glob_match::glob_match(pattern, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(p: &str, t: &str) -> bool {
        key_matches(p, t)
    }

    #[test]
    fn glob_semantics() {
        assert!(g("tenant:T:*", "tenant:T:wallet:W1"));
        assert!(g("tenant:T:*", "tenant:T:"));
        assert!(!g("tenant:T:*", "tenant:T2:wallet"));
        assert!(g("slot:?:transactions", "slot:7:transactions"));
        assert!(!g("slot:?:transactions", "slot:17:transactions"));
        assert!(g("slot:[0-4]*", "slot:3:transactions"));
        assert!(!g("slot:[^0-4]*", "slot:3:transactions"));
        assert!(g("a*b*c", "axxbyyc"));
        assert!(!g("a*b*c", "axxbyy"));
        assert!(g("*", ""));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryKvStore::new();
        store.set_ex("k", "v", 10).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_and_del_by_pattern() {
        let store = MemoryKvStore::new();
        let entries = vec![
            ("tenant:A:x".to_string(), "1".to_string()),
            ("tenant:A:y".to_string(), "2".to_string()),
            ("tenant:B:x".to_string(), "3".to_string()),
        ];
        store.set_many_ex(&entries, 60).await.unwrap();

        let mut keys = store.keys("tenant:A:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["tenant:A:x", "tenant:A:y"]);
        assert_eq!(store.del(&keys).await.unwrap(), 2);
        assert_eq!(store.info().await.unwrap().key_count, 1);
    }

    #[tokio::test]
    async fn incr_and_expire() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("c", 1).await.unwrap(), 1);
        assert_eq!(store.incr("c", 4).await.unwrap(), 5);
        assert!(store.expire("c", 30).await.unwrap());
        assert!(!store.expire("missing", 30).await.unwrap());

        store.set_ex("s", "text", 30).await.unwrap();
        assert!(store.incr("s", 1).await.is_err());
    }

    #[tokio::test]
    async fn incr_overflow_is_an_error_and_keeps_the_value() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("c", i64::MAX).await.unwrap(), i64::MAX);
        assert!(matches!(store.incr("c", 1).await, Err(CacheError::Backend(_))));
        assert_eq!(store.get("c").await.unwrap(), Some(i64::MAX.to_string()));
        assert_eq!(store.incr("c", -1).await.unwrap(), i64::MAX - 1);
    }

    #[tokio::test]
    async fn mget_preserves_order() {
        let store = MemoryKvStore::new();
        store.set_ex("a", "1", 60).await.unwrap();
        store.set_ex("c", "3", 60).await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            store.mget(&keys).await.unwrap(),
            vec![Some("1".into()), None, Some("3".into())]
        );
    }
}
