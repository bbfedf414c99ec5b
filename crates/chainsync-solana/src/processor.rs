//! Transaction processor adapters.
//!
//! - [`DedupProcessor`] wraps any processor and skips signatures it has
//!   already completed. The realtime and polling paths both deliver the same
//!   signatures; this keeps the duplicate cheap.
//! - [`HttpTransactionProcessor`] forwards each signature to an external
//!   decoder service.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chainsync_core::error::IndexerError;
use chainsync_core::ports::TransactionProcessor;
use chainsync_core::types::SignatureInfo;

/// Bounded FIFO set of completed signatures.
struct SeenSignatures {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl SeenSignatures {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1_024)),
            set: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, sig: &str) -> bool {
        self.set.contains(sig)
    }

    fn insert(&mut self, sig: &str) {
        if !self.set.insert(sig.to_string()) {
            return;
        }
        self.order.push_back(sig.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}

/// Skips signatures that were already processed successfully.
///
/// A signature is remembered only after the inner processor succeeds, so a
/// failed attempt is retried on the next delivery.
pub struct DedupProcessor {
    inner: Arc<dyn TransactionProcessor>,
    seen: Mutex<SeenSignatures>,
}

impl DedupProcessor {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(inner: Arc<dyn TransactionProcessor>) -> Self {
        Self::with_capacity(inner, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn TransactionProcessor>, capacity: usize) -> Self {
        Self {
            inner,
            seen: Mutex::new(SeenSignatures::new(capacity)),
        }
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, SeenSignatures> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TransactionProcessor for DedupProcessor {
    async fn process_transaction(&self, info: &SignatureInfo) -> Result<(), IndexerError> {
        if self.seen().contains(&info.signature) {
            tracing::debug!(signature = %info.signature, "Skipping already processed signature");
            return Ok(());
        }
        self.inner.process_transaction(info).await?;
        self.seen().insert(&info.signature);
        Ok(())
    }
}

/// POSTs each signature as JSON to an external decoder endpoint.
pub struct HttpTransactionProcessor {
    url: String,
    http: reqwest::Client,
}

impl HttpTransactionProcessor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Other(format!("processor client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl TransactionProcessor for HttpTransactionProcessor {
    async fn process_transaction(&self, info: &SignatureInfo) -> Result<(), IndexerError> {
        let failed = |reason: String| IndexerError::Processor {
            signature: info.signature.clone(),
            reason,
        };
        let resp = self
            .http
            .post(&self.url)
            .json(info)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}
