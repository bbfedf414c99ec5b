use serde::{Deserialize, Serialize};

/// Cache layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write does not specify one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// How many recent slots the warmer pre-populates.
    #[serde(default = "default_warm_slot_window")]
    pub warm_slot_window: u64,
    /// Interval between warming passes.
    #[serde(default = "default_warm_interval_ms")]
    pub warm_interval_ms: u64,
    /// Interval between store introspection refreshes of the gauges.
    #[serde(default = "default_metrics_refresh_ms")]
    pub metrics_refresh_ms: u64,
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_warm_slot_window() -> u64 {
    10
}
fn default_warm_interval_ms() -> u64 {
    60_000
}
fn default_metrics_refresh_ms() -> u64 {
    30_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            warm_slot_window: default_warm_slot_window(),
            warm_interval_ms: default_warm_interval_ms(),
            metrics_refresh_ms: default_metrics_refresh_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: CacheConfig = serde_json::from_str(r#"{"default_ttl_secs": 60}"#).unwrap();
        assert_eq!(cfg.default_ttl_secs, 60);
        assert_eq!(cfg.warm_slot_window, 10);
        assert_eq!(cfg.metrics_refresh_ms, 30_000);
    }
}
