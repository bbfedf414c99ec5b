//! chainsync-reconcile: periodic drift audits between ticket records and
//! the ledger.
//!
//! The realtime indexer can miss events (dropped subscriptions, replays,
//! partial failures). The [`ReconciliationEngine`] is the safety net: on a
//! fixed interval it pulls stale tickets from the ticket authority, compares
//! each with fresh on-chain state and writes the chain's value back.
//!
//! Discrepancy precedence is fixed: `TOKEN_NOT_FOUND`, then
//! `OWNERSHIP_MISMATCH`, then `BURN_NOT_RECORDED`. See [`classify()`].

pub mod authority;
pub mod classify;
pub mod config;
pub mod engine;

pub use authority::HttpTicketAuthority;
pub use classify::classify;
pub use config::ReconcileConfig;
pub use engine::ReconciliationEngine;
