//! Discrepancies between a ticket record and on-chain state.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ticket::{SyncPatch, TicketStatus};

/// Classification of a detected mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    TokenNotFound,
    OwnershipMismatch,
    BurnNotRecorded,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::OwnershipMismatch => "OWNERSHIP_MISMATCH",
            Self::BurnNotRecorded => "BURN_NOT_RECORDED",
        }
    }
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mismatch between the ticket authority and the ledger.
///
/// The chain side is authoritative: [`Discrepancy::correction`] always
/// carries the chain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// The ticket claims to be minted but the asset does not resolve on-chain.
    TokenNotFound,
    /// The recorded wallet differs from the on-chain owner.
    OwnershipMismatch {
        db_owner: Option<String>,
        chain_owner: String,
    },
    /// The asset is burned on-chain but the ticket status does not say so.
    BurnNotRecorded { db_status: TicketStatus },
}

impl Discrepancy {
    pub fn kind(&self) -> DiscrepancyKind {
        match self {
            Self::TokenNotFound => DiscrepancyKind::TokenNotFound,
            Self::OwnershipMismatch { .. } => DiscrepancyKind::OwnershipMismatch,
            Self::BurnNotRecorded { .. } => DiscrepancyKind::BurnNotRecorded,
        }
    }

    /// Name of the ticket column that disagrees with the chain.
    pub fn field(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "is_minted",
            Self::OwnershipMismatch { .. } => "wallet_address",
            Self::BurnNotRecorded { .. } => "status",
        }
    }

    pub fn db_value(&self) -> Value {
        match self {
            Self::TokenNotFound => json!(true),
            Self::OwnershipMismatch { db_owner, .. } => json!(db_owner),
            Self::BurnNotRecorded { db_status } => json!(db_status.as_str()),
        }
    }

    pub fn chain_value(&self) -> Value {
        match self {
            Self::TokenNotFound => json!(false),
            Self::OwnershipMismatch { chain_owner, .. } => json!(chain_owner),
            Self::BurnNotRecorded { .. } => json!(TicketStatus::Burned.as_str()),
        }
    }

    /// The update that brings the ticket in line with the chain.
    pub fn correction(&self) -> SyncPatch {
        let mut patch = SyncPatch::synced();
        match self {
            Self::TokenNotFound => patch.is_minted = Some(false),
            Self::OwnershipMismatch { chain_owner, .. } => {
                patch.wallet_address = Some(chain_owner.clone())
            }
            Self::BurnNotRecorded { .. } => patch.status = Some(TicketStatus::Burned),
        }
        patch
    }
}
