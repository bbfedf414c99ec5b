//! HTTP JSON-RPC ledger client backed by `reqwest`.
//!
//! Requests are sent once. A failed call surfaces as a transient error and
//! the caller's next tick is the retry; there is no backoff here.
//!
//! Implements [`LedgerClient`] (subscriptions are delegated to an optional
//! [`PubsubClient`]) and [`AssetStateReader`] through the DAS `getAsset`
//! method.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainsync_core::error::{IndexerError, ReconcileError};
use chainsync_core::ports::{AssetStateReader, LedgerClient, ProgramSubscription, SubscriptionId};
use chainsync_core::ticket::OnChainState;
use chainsync_core::types::{Commitment, LedgerBlock, SignatureInfo};

use crate::error::TransportError;
use crate::pubsub::PubsubClient;
use crate::wire::{self, JsonRpcRequest, JsonRpcResponse};

/// Configuration for `SolanaRpcClient`.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub request_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC client for a Solana node.
pub struct SolanaRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    pubsub: Option<PubsubClient>,
}

impl SolanaRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: RpcClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
            pubsub: None,
        })
    }

    /// Route program subscriptions through a WebSocket client.
    pub fn with_pubsub(mut self, pubsub: PubsubClient) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let resp = self.send_once(&req).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self.http.post(&self.url).json(req).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        Ok(resp.json::<JsonRpcResponse>().await?)
    }
}

/// `getBlock` and `getSignaturesForAddress` reject `processed`.
fn ledger_commitment(commitment: Commitment) -> Commitment {
    match commitment {
        Commitment::Processed => Commitment::Confirmed,
        other => other,
    }
}

fn block_params(slot: u64, commitment: Commitment) -> Value {
    json!([
        slot,
        {
            "encoding": "json",
            "transactionDetails": "accounts",
            "rewards": false,
            "maxSupportedTransactionVersion": 0,
            "commitment": ledger_commitment(commitment),
        }
    ])
}

fn signatures_params(address: &str, limit: usize, commitment: Commitment) -> Value {
    json!([
        address,
        { "limit": limit, "commitment": ledger_commitment(commitment) }
    ])
}

#[async_trait]
impl LedgerClient for SolanaRpcClient {
    async fn get_slot(&self, commitment: Commitment) -> Result<u64, IndexerError> {
        let result = self
            .call("getSlot", json!([{ "commitment": commitment }]))
            .await?;
        result
            .as_u64()
            .ok_or_else(|| IndexerError::Rpc(format!("getSlot returned {result}")))
    }

    async fn get_block(
        &self,
        slot: u64,
        commitment: Commitment,
    ) -> Result<Option<LedgerBlock>, IndexerError> {
        let result = match self.call("getBlock", block_params(slot, commitment)).await {
            Ok(result) => result,
            Err(TransportError::Rpc(e)) if e.is_missing_block() => {
                tracing::debug!(slot, code = e.code, "No block for slot");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        wire::decode_block(slot, result)
            .map_err(|e| IndexerError::Rpc(format!("decode block {slot}: {e}")))
    }

    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        commitment: Commitment,
    ) -> Result<Vec<SignatureInfo>, IndexerError> {
        let result = self
            .call(
                "getSignaturesForAddress",
                signatures_params(address, limit, commitment),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("decode signatures: {e}")))
    }

    async fn subscribe_program(
        &self,
        program_id: &str,
        commitment: Commitment,
    ) -> Result<ProgramSubscription, IndexerError> {
        match &self.pubsub {
            Some(pubsub) => Ok(pubsub.program_subscribe(program_id, commitment).await?),
            None => Err(IndexerError::Subscription(
                "no websocket endpoint configured".into(),
            )),
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), IndexerError> {
        match &self.pubsub {
            Some(pubsub) => Ok(pubsub.unsubscribe(id).await?),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AssetStateReader for SolanaRpcClient {
    async fn asset_state(&self, token_id: &str) -> Result<Option<OnChainState>, ReconcileError> {
        asset_lookup(token_id, self.call("getAsset", json!({ "id": token_id })).await)
    }
}

/// Map a `getAsset` reply. Only the DAS "asset not found" answer means the
/// asset is absent; every other error is a failed lookup.
fn asset_lookup(
    token_id: &str,
    reply: Result<Value, TransportError>,
) -> Result<Option<OnChainState>, ReconcileError> {
    let result = match reply {
        Ok(result) => result,
        Err(TransportError::Rpc(e)) if e.is_asset_not_found() => return Ok(None),
        Err(e) => return Err(ReconcileError::Chain(format!("getAsset {token_id}: {e}"))),
    };
    wire::decode_asset(result)
        .map_err(|e| ReconcileError::Chain(format!("decode asset {token_id}: {e}")))
}
