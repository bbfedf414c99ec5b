//! Service configuration: optional JSON file, then environment overrides.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chainsync_cache::CacheConfig;
use chainsync_reconcile::ReconcileConfig;
use chainsync_solana::IndexerConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// PostgreSQL URL. Without it, progress lives in memory only.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// WebSocket endpoint for realtime subscriptions.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub ticket_service_url: Option<String>,
    #[serde(default)]
    pub ticket_service_token: Option<String>,
    /// Decoder endpoint each transaction signature is posted to.
    #[serde(default)]
    pub processor_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".into()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            rpc_url: default_rpc_url(),
            ws_url: None,
            redis_url: None,
            ticket_service_url: None,
            ticket_service_token: None,
            processor_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            indexer: IndexerConfig::default(),
            reconcile: ReconcileConfig::default(),
            cache: CacheConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from environment variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(v) = var(key).filter(|v| !v.is_empty()) {
                *target = Some(v);
            }
        };
        set(&mut self.database_url, "DATABASE_URL");
        set(&mut self.ws_url, "SOLANA_WS_URL");
        set(&mut self.redis_url, "REDIS_URL");
        set(&mut self.ticket_service_url, "TICKET_SERVICE_URL");
        set(&mut self.ticket_service_token, "TICKET_SERVICE_TOKEN");
        set(&mut self.processor_url, "PROCESSOR_URL");
        set(&mut self.indexer.program_id, "PROGRAM_ID");

        if let Some(v) = var("SOLANA_RPC_URL").filter(|v| !v.is_empty()) {
            self.rpc_url = v;
        }
        if let Some(v) = var("TENANT_ID").filter(|v| !v.is_empty()) {
            self.reconcile.tenant_id = v;
        }
        if let Some(v) = var("LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log.level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log.json = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }
    }
}
