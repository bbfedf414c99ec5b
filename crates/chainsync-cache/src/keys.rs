//! Cache key construction.
//!
//! Anything that can differ between tenants lives under `tenant:{id}:`.
//! Keys that mirror shared ledger state (sync status, slot contents,
//! transactions, asset state) are never tenant-prefixed, so a tenant purge
//! cannot touch them and every tenant reads the same copy.

/// Shared indexer sync status.
pub const SYNC_STATUS: &str = "sync:status";

/// Prefix of every tenant-scoped key.
pub fn tenant_prefix(tenant_id: &str) -> String {
    format!("tenant:{tenant_id}:")
}

/// Glob matching every key of one tenant.
pub fn tenant_pattern(tenant_id: &str) -> String {
    format!("tenant:{tenant_id}:*")
}

/// Arbitrary tenant-scoped key: `tenant:{tenant_id}:{suffix}`.
pub fn tenant(tenant_id: &str, suffix: &str) -> String {
    format!("tenant:{tenant_id}:{suffix}")
}

/// Signatures seen in one slot.
pub fn slot_transactions(slot: u64) -> String {
    format!("slot:{slot}:transactions")
}

/// A decoded ledger transaction.
pub fn transaction(signature: &str) -> String {
    format!("tx:{signature}")
}

/// Last fetched on-chain state of an asset.
pub fn asset_state(token_id: &str) -> String {
    format!("chain:asset:{token_id}")
}

/// Wallet view for one tenant. Sub-keys hang off it as `{key}:…` and are
/// matched by [`wallet_pattern`].
pub fn wallet(tenant_id: &str, address: &str) -> String {
    tenant(tenant_id, &format!("wallet:{address}"))
}

pub fn wallet_pattern(tenant_id: &str, address: &str) -> String {
    format!("{}:*", wallet(tenant_id, address))
}

/// NFT view for one tenant; sub-keys are matched by [`nft_pattern`].
pub fn nft(tenant_id: &str, token_id: &str) -> String {
    tenant(tenant_id, &format!("nft:{token_id}"))
}

pub fn nft_pattern(tenant_id: &str, token_id: &str) -> String {
    format!("{}:*", nft(tenant_id, token_id))
}

/// Ticket views for one tenant.
pub fn ticket(tenant_id: &str, ticket_id: &str) -> String {
    tenant(tenant_id, &format!("ticket:{ticket_id}"))
}

pub fn ticket_pattern(tenant_id: &str, ticket_id: &str) -> String {
    format!("{}:*", ticket(tenant_id, ticket_id))
}

/// Every marketplace listing view for one tenant.
pub fn marketplace_pattern(tenant_id: &str) -> String {
    tenant(tenant_id, "marketplace:*")
}

pub fn marketplace_listing(tenant_id: &str, listing_id: &str) -> String {
    tenant(tenant_id, &format!("marketplace:listing:{listing_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_keys_share_prefix() {
        let prefix = tenant_prefix("t1");
        for key in [
            wallet("t1", "W1"),
            nft("t1", "asset"),
            ticket("t1", "tk"),
            marketplace_listing("t1", "l1"),
        ] {
            assert!(key.starts_with(&prefix), "{key}");
        }
        assert_eq!(tenant_pattern("t1"), "tenant:t1:*");
    }

    #[test]
    fn ledger_keys_are_not_tenant_scoped() {
        for key in [
            SYNC_STATUS.to_string(),
            slot_transactions(42),
            transaction("sig"),
            asset_state("asset"),
        ] {
            assert!(!key.starts_with("tenant:"), "{key}");
        }
        assert_eq!(slot_transactions(42), "slot:42:transactions");
    }

    #[test]
    fn entity_patterns_stop_at_the_id() {
        assert_eq!(wallet_pattern("t1", "W1"), "tenant:t1:wallet:W1:*");
        assert_eq!(nft_pattern("t1", "a"), "tenant:t1:nft:a:*");
        assert_eq!(ticket_pattern("t1", "tk"), "tenant:t1:ticket:tk:*");
    }
}
