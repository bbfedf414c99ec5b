//! Event-driven cache invalidation.
//!
//! One method per entity-change event. Callers invoke them right after the
//! authoritative write they correspond to. Failures are logged and counted
//! by the service and never reach the caller; the return value is the
//! number of keys removed.

use std::sync::Arc;

use crate::keys;
use crate::service::CacheService;

/// Maps domain change events onto the cache keys they make stale.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<CacheService>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// A ledger transaction was handed to the processor.
    pub async fn on_transaction_processed(&self, signature: &str, slot: u64) -> u64 {
        self.invalidate(
            "transaction_processed",
            vec![
                keys::transaction(signature),
                keys::slot_transactions(slot),
                keys::SYNC_STATUS.to_string(),
            ],
            &[],
        )
        .await
    }

    /// Balances, holdings or history of a wallet changed.
    pub async fn on_wallet_activity(&self, tenant_id: &str, wallet: &str) -> u64 {
        self.invalidate(
            "wallet_activity",
            vec![keys::wallet(tenant_id, wallet)],
            &[keys::wallet_pattern(tenant_id, wallet)],
        )
        .await
    }

    /// An NFT moved between wallets (or was burned). Both wallets' views and
    /// the cached on-chain state go stale.
    pub async fn on_nft_ownership_changed(
        &self,
        tenant_id: &str,
        token_id: &str,
        previous_owner: Option<&str>,
        new_owner: Option<&str>,
    ) -> u64 {
        let mut exact = vec![keys::asset_state(token_id), keys::nft(tenant_id, token_id)];
        let mut patterns = vec![keys::nft_pattern(tenant_id, token_id)];
        for wallet in [previous_owner, new_owner].into_iter().flatten() {
            exact.push(keys::wallet(tenant_id, wallet));
            patterns.push(keys::wallet_pattern(tenant_id, wallet));
        }
        self.invalidate("nft_ownership_changed", exact, &patterns)
        .await
    }

    /// A ticket record was rewritten by the authority.
    pub async fn on_ticket_updated(&self, tenant_id: &str, ticket_id: &str) -> u64 {
        self.invalidate(
            "ticket_updated",
            vec![keys::ticket(tenant_id, ticket_id)],
            &[keys::ticket_pattern(tenant_id, ticket_id)],
        )
        .await
    }

    /// A listing was created, filled or cancelled.
    pub async fn on_marketplace_event(&self, tenant_id: &str, listing_id: Option<&str>) -> u64 {
        let exact = listing_id
            .map(|id| vec![keys::marketplace_listing(tenant_id, id)])
            .unwrap_or_default();
        self.invalidate(
            "marketplace_event",
            exact,
            &[keys::marketplace_pattern(tenant_id)],
        )
        .await
    }

    pub async fn on_sync_status_changed(&self) -> u64 {
        self.invalidate(
            "sync_status_changed",
            vec![keys::SYNC_STATUS.to_string()],
            &[],
        )
        .await
    }

    /// Drop every tenant-scoped key. Shared ledger keys are untouched.
    pub async fn purge_tenant(&self, tenant_id: &str) -> u64 {
        let removed = self
            .invalidate("tenant_purge", Vec::new(), &[keys::tenant_pattern(tenant_id)])
            .await;
        tracing::info!(tenant = tenant_id, removed, "Purged tenant cache");
        removed
    }

    async fn invalidate(&self, event: &'static str, exact: Vec<String>, patterns: &[String]) -> u64 {
        let mut removed = self.cache.del_many(&exact).await;
        for pattern in patterns {
            match self.cache.try_del_pattern(pattern).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(event, pattern = %pattern, error = %e, "Cache invalidation failed")
                }
            }
        }
        tracing::debug!(event, removed, "Cache invalidated");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Arc<CacheService>, CacheInvalidator) {
        let cache = Arc::new(CacheService::in_memory());
        for key in [
            keys::SYNC_STATUS.to_string(),
            keys::slot_transactions(10),
            keys::transaction("sig1"),
            keys::asset_state("asset1"),
            keys::nft("T", "asset1"),
            keys::tenant("T", "nft:asset1:history"),
            keys::wallet("T", "W1"),
            keys::tenant("T", "wallet:W1:nfts"),
            keys::wallet("T", "W2"),
            keys::wallet("T", "W3"),
            keys::wallet("T", "W10"),
            keys::tenant("T", "wallet:W10:nfts"),
            keys::nft("T", "asset10"),
            keys::marketplace_listing("T", "L1"),
            keys::ticket("T", "tk1"),
            keys::wallet("U", "W1"),
        ] {
            cache.set(&key, &true, None).await;
        }
        let inv = CacheInvalidator::new(cache.clone());
        (cache, inv)
    }

    #[tokio::test]
    async fn transaction_processed_touches_only_ledger_keys() {
        let (cache, inv) = seeded().await;
        assert_eq!(inv.on_transaction_processed("sig1", 10).await, 3);
        assert!(cache.get::<bool>(keys::SYNC_STATUS).await.is_none());
        assert!(cache.get::<bool>(&keys::wallet("T", "W1")).await.is_some());
    }

    #[tokio::test]
    async fn ownership_change_clears_both_wallets_and_asset_state() {
        let (cache, inv) = seeded().await;
        let removed = inv
            .on_nft_ownership_changed("T", "asset1", Some("W1"), Some("W2"))
            .await;
        // asset state + 2 nft keys + 2 W1 keys + 1 W2 key
        assert_eq!(removed, 6);
        assert!(cache.get::<bool>(&keys::wallet("T", "W3")).await.is_some());
        assert!(cache.get::<bool>(&keys::wallet("U", "W1")).await.is_some());
    }

    #[tokio::test]
    async fn entity_invalidation_spares_ids_sharing_a_prefix() {
        let (cache, inv) = seeded().await;
        inv.on_wallet_activity("T", "W1").await;
        inv.on_nft_ownership_changed("T", "asset1", None, None).await;
        assert!(cache.get::<bool>(&keys::wallet("T", "W1")).await.is_none());
        assert!(cache.get::<bool>(&keys::wallet("T", "W10")).await.is_some());
        assert!(cache.get::<bool>(&keys::tenant("T", "wallet:W10:nfts")).await.is_some());
        assert!(cache.get::<bool>(&keys::nft("T", "asset10")).await.is_some());
    }

    #[tokio::test]
    async fn tenant_purge_spares_other_tenants_and_ledger_keys() {
        let (cache, inv) = seeded().await;
        inv.purge_tenant("T").await;
        assert!(cache.get::<bool>(&keys::ticket("T", "tk1")).await.is_none());
        assert!(cache.get::<bool>(&keys::marketplace_listing("T", "L1")).await.is_none());
        assert!(cache.get::<bool>(&keys::wallet("U", "W1")).await.is_some());
        assert!(cache.get::<bool>(&keys::slot_transactions(10)).await.is_some());
    }

    #[tokio::test]
    async fn marketplace_and_ticket_events() {
        let (cache, inv) = seeded().await;
        assert_eq!(inv.on_marketplace_event("T", Some("L1")).await, 1);
        assert_eq!(inv.on_ticket_updated("T", "tk1").await, 1);
        assert_eq!(inv.on_sync_status_changed().await, 1);
        assert_eq!(inv.on_wallet_activity("T", "W3").await, 1);
        assert!(cache.get::<bool>(&keys::wallet("T", "W2")).await.is_some());
    }
}
