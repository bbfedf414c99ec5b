//! Ticket records owned by the external ticket authority, and the patches
//! the reconciler pushes back to it.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a ticket as recorded by the ticket authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Minted,
    Transferred,
    Used,
    Burned,
    Cancelled,
    /// Any status this service does not interpret.
    #[serde(other)]
    Other,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Minted => "MINTED",
            Self::Transferred => "TRANSFERRED",
            Self::Used => "USED",
            Self::Burned => "BURNED",
            Self::Cancelled => "CANCELLED",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blockchain sync marker on a ticket record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Failed,
}

/// A ticket as returned by the ticket authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub id: String,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub is_minted: bool,
    #[serde(default)]
    pub wallet_address: Option<String>,
    pub status: TicketStatus,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Ground-truth ownership state of an asset on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainState {
    pub owner: String,
    pub burned: bool,
}

/// Partial update sent to the ticket authority's blockchain-sync endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPatch {
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_minted: Option<bool>,
}

impl SyncPatch {
    /// A patch that only stamps the ticket as synced.
    pub fn synced() -> Self {
        Self {
            sync_status: SyncStatus::Synced,
            ..Default::default()
        }
    }
}

/// Per-call context forwarded to the ticket authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: String,
    pub trace_id: String,
}

impl RequestContext {
    /// Create a context with a fresh trace id.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Selection parameters for the reconciliation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileQuery {
    pub limit: usize,
    pub stale_hours: u32,
}

/// A batch of tickets due for reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketBatch {
    pub count: usize,
    pub tickets: Vec<TicketRecord>,
}
