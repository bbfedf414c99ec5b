//! chainsync-cache: tenant-aware cache layer.
//!
//! The cache only ever holds values derivable from the ledger or the ticket
//! authority. Losing every entry changes latency, never behaviour.
//!
//! # Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | In-memory | `memory` (default) | Tests, single-process deployments |
//! | Redis | `redis` | Shared cache across service instances |
//!
//! # Modules
//!
//! - [`service`]: typed, non-throwing [`CacheService`]
//! - [`keys`]: tenant-scoped and shared key construction
//! - [`invalidation`]: one invalidation call per domain change event
//! - [`warming`]: periodic pre-population of hot keys
//! - [`metrics`]: OpenTelemetry instruments and in-process stats

pub mod config;
pub mod error;
pub mod invalidation;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod service;
pub mod store;
pub mod warming;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use invalidation::CacheInvalidator;
pub use memory::MemoryKvStore;
pub use metrics::{CacheMetrics, CacheStats, CacheStatsSnapshot};
pub use service::CacheService;
pub use store::{KvStore, StoreInfo};
pub use warming::{CacheWarmer, WarmEntry, WarmSource, WarmingReport};

#[cfg(feature = "redis")]
pub use redis_store::RedisKvStore;
