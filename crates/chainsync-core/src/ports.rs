//! Collaborator traits consumed by the indexer and the reconciler.
//!
//! Concrete adapters live in `chainsync-solana` (ledger RPC / pubsub) and
//! `chainsync-reconcile` (ticket authority HTTP client).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{IndexerError, ReconcileError};
use crate::ticket::{OnChainState, ReconcileQuery, RequestContext, SyncPatch, TicketBatch};
use crate::types::{Commitment, LedgerBlock, SignatureInfo, SlotNotification};

/// Server-assigned id of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live program-account subscription: notifications arrive on a bounded
/// queue and are drained by a single consumer.
#[derive(Debug)]
pub struct ProgramSubscription {
    pub id: SubscriptionId,
    pub notifications: mpsc::Receiver<SlotNotification>,
}

/// Read access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current ledger height.
    async fn get_slot(&self, commitment: Commitment) -> Result<u64, IndexerError>;

    /// The full block at `slot`, or `None` if the slot was skipped.
    async fn get_block(
        &self,
        slot: u64,
        commitment: Commitment,
    ) -> Result<Option<LedgerBlock>, IndexerError>;

    /// Most recent signatures touching `address`, newest first.
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        commitment: Commitment,
    ) -> Result<Vec<SignatureInfo>, IndexerError>;

    /// Subscribe to account changes for every account owned by `program_id`.
    async fn subscribe_program(
        &self,
        program_id: &str,
        commitment: Commitment,
    ) -> Result<ProgramSubscription, IndexerError>;

    /// Tear down a subscription created by [`subscribe_program`](Self::subscribe_program).
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), IndexerError>;
}

/// Decodes one ledger transaction into domain writes.
///
/// Implementations must be idempotent per signature: the indexer delivers
/// at-least-once and both ingestion paths may hand over the same signature.
#[async_trait]
pub trait TransactionProcessor: Send + Sync {
    async fn process_transaction(&self, info: &SignatureInfo) -> Result<(), IndexerError>;
}

/// Resolves the authoritative on-chain state of an asset.
#[async_trait]
pub trait AssetStateReader: Send + Sync {
    /// `Ok(None)` when the asset has no resolvable on-chain record.
    async fn asset_state(&self, token_id: &str) -> Result<Option<OnChainState>, ReconcileError>;
}

/// The external service that owns ticket records.
#[async_trait]
pub trait TicketAuthority: Send + Sync {
    async fn tickets_for_reconciliation(
        &self,
        ctx: &RequestContext,
        query: ReconcileQuery,
    ) -> Result<TicketBatch, ReconcileError>;

    async fn update_blockchain_sync(
        &self,
        ticket_id: &str,
        patch: &SyncPatch,
        ctx: &RequestContext,
    ) -> Result<(), ReconcileError>;
}
