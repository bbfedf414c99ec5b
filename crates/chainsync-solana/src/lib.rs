//! chainsync-solana: Solana ingestion for ChainSync.
//!
//! # Components
//!
//! - [`SolanaIndexer`]: realtime subscription plus polling catch-up, driving
//!   a [`TransactionProcessor`](chainsync_core::ports::TransactionProcessor)
//!   and a monotonic checkpoint
//! - [`SolanaRpcClient`]: JSON-RPC over HTTP (`getSlot`, `getBlock`,
//!   `getSignaturesForAddress`, DAS `getAsset`)
//! - [`PubsubClient`]: `programSubscribe` over WebSocket with reconnect
//! - [`DedupProcessor`] / [`HttpTransactionProcessor`]: processor adapters

pub mod builder;
pub mod config;
pub mod error;
pub mod indexer;
pub mod processor;
pub mod pubsub;
pub mod rpc;
pub mod wire;

pub use builder::IndexerBuilder;
pub use config::{IndexerConfig, IndexerState, IndexerStatus};
pub use error::TransportError;
pub use indexer::SolanaIndexer;
pub use processor::{DedupProcessor, HttpTransactionProcessor};
pub use pubsub::{PubsubClient, PubsubConfig};
pub use rpc::{RpcClientConfig, SolanaRpcClient};
