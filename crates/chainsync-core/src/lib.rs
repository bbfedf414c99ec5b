//! chainsync-core: foundation for the chain-to-database sync subsystem.
//!
//! # Architecture
//!
//! ```text
//! SolanaIndexer ───────────────┐          ReconciliationEngine
//!   ├── LedgerClient (RPC/WS)  │            ├── TicketAuthority
//!   ├── TransactionProcessor   │            ├── AssetStateReader
//!   └── CheckpointManager      │            └── RunStore
//!                              ▼
//!                      CacheService (never authoritative)
//! ```
//!
//! This crate holds the shared types, the collaborator traits, checkpoint
//! and run persistence traits with in-memory implementations, and the
//! ticker/shutdown primitives every periodic loop runs on.

pub mod checkpoint;
pub mod discrepancy;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod runs;
pub mod schedule;
pub mod stats;
pub mod ticket;
pub mod types;

pub use checkpoint::{CheckpointManager, CheckpointState, CheckpointStore, MemoryCheckpointStore};
pub use discrepancy::{Discrepancy, DiscrepancyKind};
pub use error::{IndexerError, ReconcileError};
pub use metrics::SyncMetrics;
pub use ports::{
    AssetStateReader, LedgerClient, ProgramSubscription, SubscriptionId, TicketAuthority,
    TransactionProcessor,
};
pub use runs::{
    DiscrepancyRecord, MemoryRunStore, ReconciliationRun, RunResults, RunStatus, RunStore,
};
pub use schedule::{
    run_every, IntervalTicker, ManualTicker, Shutdown, ShutdownSignal, TickHandle, Ticker,
};
pub use stats::{SyncCounters, SyncStats};
pub use ticket::{
    OnChainState, ReconcileQuery, RequestContext, SyncPatch, SyncStatus, TicketBatch,
    TicketRecord, TicketStatus,
};
pub use types::{Commitment, LedgerBlock, LedgerTransaction, SignatureInfo, SlotNotification};
