//! chainsync-storage: durable backends for checkpoints and reconciliation runs.
//!
//! Backends:
//! - in-memory: [`MemoryCheckpointStore`] / [`MemoryRunStore`], re-exported
//!   from `chainsync-core` (dev/testing, no persistence)
//! - [`postgres`]: PostgreSQL via `sqlx` (feature `postgres`, default on)

pub use chainsync_core::checkpoint::MemoryCheckpointStore;
pub use chainsync_core::runs::MemoryRunStore;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStorage};
