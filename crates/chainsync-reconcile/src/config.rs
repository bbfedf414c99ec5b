//! Reconciliation engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Time between sweeps (milliseconds).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum tickets audited per sweep.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Only tickets not reconciled within this many hours are fetched.
    #[serde(default = "default_stale_hours")]
    pub stale_hours: u32,
    /// Tenant the sweep runs on behalf of.
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    /// TTL of the on-chain state written through to the cache.
    #[serde(default = "default_asset_cache_ttl_secs")]
    pub asset_cache_ttl_secs: u64,
}

fn default_interval_ms() -> u64 {
    300_000
}
fn default_batch_limit() -> usize {
    100
}
fn default_stale_hours() -> u32 {
    1
}
fn default_tenant_id() -> String {
    "system".into()
}
fn default_asset_cache_ttl_secs() -> u64 {
    60
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_limit: default_batch_limit(),
            stale_hours: default_stale_hours(),
            tenant_id: default_tenant_id(),
            asset_cache_ttl_secs: default_asset_cache_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ReconcileConfig =
            serde_json::from_str(r#"{"tenant_id": "venue-7", "batch_limit": 25}"#).unwrap();
        assert_eq!(cfg.tenant_id, "venue-7");
        assert_eq!(cfg.batch_limit, 25);
        assert_eq!(cfg.interval_ms, 300_000);
        assert_eq!(cfg.stale_hours, 1);
    }
}
