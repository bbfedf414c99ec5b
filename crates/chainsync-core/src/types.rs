//! Ledger-side types shared by the indexer and its collaborators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Commitment ───────────────────────────────────────────────────────────────

/// Ledger commitment level used for reads and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── SignatureInfo ────────────────────────────────────────────────────────────

/// Minimal description of one ledger transaction, as handed to the
/// transaction processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Base-58 transaction signature.
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// On-chain execution error, if the transaction failed.
    #[serde(default)]
    pub err: Option<Value>,
    /// Unix timestamp of the containing block, when known.
    #[serde(default)]
    pub block_time: Option<i64>,
}

impl SignatureInfo {
    /// Returns `true` if the transaction failed on-chain.
    pub fn is_failed(&self) -> bool {
        matches!(&self.err, Some(v) if !v.is_null())
    }
}

// ─── LedgerBlock ──────────────────────────────────────────────────────────────

/// One transaction inside a fetched block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// First (fee-payer) signature of the transaction.
    pub signature: String,
    /// Execution error from the transaction meta, if any.
    pub err: Option<Value>,
}

/// A full block at a given slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub transactions: Vec<LedgerTransaction>,
}

impl LedgerBlock {
    /// Signature records for every transaction that did not fail on-chain,
    /// in block order.
    pub fn successful_signatures(&self) -> Vec<SignatureInfo> {
        self.transactions
            .iter()
            .filter(|tx| matches!(&tx.err, None | Some(Value::Null)))
            .map(|tx| SignatureInfo {
                signature: tx.signature.clone(),
                slot: self.slot,
                err: None,
                block_time: self.block_time,
            })
            .collect()
    }
}

// ─── SlotNotification ─────────────────────────────────────────────────────────

/// A realtime notification that an account owned by the tracked program
/// changed at `slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNotification {
    pub slot: u64,
    /// The account that changed, when the subscription reports it.
    pub pubkey: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
