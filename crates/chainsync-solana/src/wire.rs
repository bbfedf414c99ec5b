//! JSON-RPC 2.0 wire types and Solana response decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainsync_core::ticket::OnChainState;
use chainsync_core::types::{LedgerBlock, LedgerTransaction, SlotNotification};

/// JSON-RPC error codes the node uses for slots with no block.
pub const SLOT_SKIPPED: i64 = -32007;
pub const BLOCK_NOT_AVAILABLE: i64 = -32004;
pub const SLOT_MISSING_IN_STORAGE: i64 = -32009;

/// Codes reserved by JSON-RPC 2.0 itself. These describe the request or the
/// server, never the asset being looked up.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request. `params` is an array for ledger methods and an
/// object for DAS methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// The node has no block for the requested slot.
    pub fn is_missing_block(&self) -> bool {
        matches!(
            self.code,
            SLOT_SKIPPED | BLOCK_NOT_AVAILABLE | SLOT_MISSING_IN_STORAGE
        )
    }

    /// Error code defined by JSON-RPC 2.0 rather than by the node.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self.code,
            PARSE_ERROR | INVALID_REQUEST | METHOD_NOT_FOUND | INVALID_PARAMS | INTERNAL_ERROR
        )
    }

    /// The DAS indexer answered and has no record of the asset.
    pub fn is_asset_not_found(&self) -> bool {
        !self.is_protocol_error() && self.message.to_ascii_lowercase().contains("asset not found")
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── getBlock ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    block_time: Option<i64>,
    #[serde(default)]
    transactions: Vec<RawBlockTransaction>,
}

#[derive(Deserialize)]
struct RawBlockTransaction {
    meta: Option<RawMeta>,
    transaction: RawTxBody,
}

#[derive(Deserialize)]
struct RawMeta {
    err: Option<Value>,
}

#[derive(Deserialize)]
struct RawTxBody {
    signatures: Vec<String>,
}

/// Decode a `getBlock` result fetched with `transactionDetails: "accounts"`.
/// A `null` result means the slot has no block.
pub fn decode_block(slot: u64, result: Value) -> Result<Option<LedgerBlock>, serde_json::Error> {
    if result.is_null() {
        return Ok(None);
    }
    let raw: RawBlock = serde_json::from_value(result)?;
    let transactions = raw
        .transactions
        .into_iter()
        .filter_map(|tx| {
            let signature = tx.transaction.signatures.into_iter().next()?;
            Some(LedgerTransaction {
                signature,
                err: tx.meta.and_then(|m| m.err),
            })
        })
        .collect();
    Ok(Some(LedgerBlock {
        slot,
        block_time: raw.block_time,
        transactions,
    }))
}

// ─── DAS getAsset ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawAsset {
    ownership: RawOwnership,
    #[serde(default)]
    burnt: bool,
}

#[derive(Deserialize)]
struct RawOwnership {
    owner: String,
}

/// Decode a DAS `getAsset` result into the reconciler's view of chain state.
pub fn decode_asset(result: Value) -> Result<Option<OnChainState>, serde_json::Error> {
    if result.is_null() {
        return Ok(None);
    }
    let raw: RawAsset = serde_json::from_value(result)?;
    Ok(Some(OnChainState {
        owner: raw.ownership.owner,
        burned: raw.burnt,
    }))
}

// ─── programNotification ─────────────────────────────────────────────────────

/// Decode the `params` of a `programNotification` into its subscription id
/// and slot notification.
pub fn decode_program_notification(params: &Value) -> Option<(u64, SlotNotification)> {
    let subscription = params.get("subscription")?.as_u64()?;
    let result = params.get("result")?;
    let slot = result.get("context")?.get("slot")?.as_u64()?;
    let pubkey = result
        .get("value")
        .and_then(|v| v.get("pubkey"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((subscription, SlotNotification { slot, pubkey }))
}
