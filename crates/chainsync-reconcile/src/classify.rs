//! Discrepancy classification.
//!
//! A ticket yields at most one discrepancy. Checks run in a fixed order and
//! the first hit wins: token not found, then ownership, then burn.

use chainsync_core::discrepancy::Discrepancy;
use chainsync_core::ticket::{OnChainState, TicketRecord, TicketStatus};

/// Compare a ticket against the chain. `chain` is `None` when the asset has
/// no on-chain record.
pub fn classify(ticket: &TicketRecord, chain: Option<&OnChainState>) -> Option<Discrepancy> {
    ticket.token_id.as_ref()?;

    let Some(chain) = chain else {
        return ticket.is_minted.then_some(Discrepancy::TokenNotFound);
    };

    if ticket.wallet_address.as_deref() != Some(chain.owner.as_str()) {
        return Some(Discrepancy::OwnershipMismatch {
            db_owner: ticket.wallet_address.clone(),
            chain_owner: chain.owner.clone(),
        });
    }

    if chain.burned && ticket.status != TicketStatus::Burned {
        return Some(Discrepancy::BurnNotRecorded {
            db_status: ticket.status,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsync_core::discrepancy::DiscrepancyKind;
    use chainsync_core::ticket::SyncStatus;
    use serde_json::json;

    fn ticket(minted: bool, wallet: Option<&str>, status: TicketStatus) -> TicketRecord {
        TicketRecord {
            id: "t-1".into(),
            token_id: Some("asset-1".into()),
            is_minted: minted,
            wallet_address: wallet.map(str::to_string),
            status,
            sync_status: SyncStatus::Pending,
        }
    }

    fn chain(owner: &str, burned: bool) -> OnChainState {
        OnChainState {
            owner: owner.into(),
            burned,
        }
    }

    #[test]
    fn ownership_mismatch_reports_both_owners() {
        let d = classify(
            &ticket(true, Some("W1"), TicketStatus::Minted),
            Some(&chain("W2", false)),
        )
        .unwrap();
        assert_eq!(d.kind(), DiscrepancyKind::OwnershipMismatch);
        assert_eq!(d.field(), "wallet_address");
        assert_eq!(d.db_value(), json!("W1"));
        assert_eq!(d.chain_value(), json!("W2"));
    }

    #[test]
    fn minted_ticket_without_asset_is_token_not_found() {
        let d = classify(&ticket(true, Some("W1"), TicketStatus::Minted), None).unwrap();
        assert_eq!(d, Discrepancy::TokenNotFound);
        assert_eq!(d.field(), "is_minted");
        assert_eq!((d.db_value(), d.chain_value()), (json!(true), json!(false)));
    }

    #[test]
    fn unminted_ticket_without_asset_is_consistent() {
        assert!(classify(&ticket(false, None, TicketStatus::Pending), None).is_none());
    }

    #[test]
    fn ticket_without_token_is_never_checked() {
        let mut t = ticket(true, Some("W1"), TicketStatus::Minted);
        t.token_id = None;
        assert!(classify(&t, None).is_none());
        assert!(classify(&t, Some(&chain("W2", true))).is_none());
    }

    #[test]
    fn ownership_takes_precedence_over_burn() {
        let d = classify(
            &ticket(true, Some("W1"), TicketStatus::Minted),
            Some(&chain("W2", true)),
        )
        .unwrap();
        assert_eq!(d.kind(), DiscrepancyKind::OwnershipMismatch);
    }

    #[test]
    fn unrecorded_burn() {
        let d = classify(
            &ticket(true, Some("W1"), TicketStatus::Minted),
            Some(&chain("W1", true)),
        )
        .unwrap();
        assert_eq!(d, Discrepancy::BurnNotRecorded { db_status: TicketStatus::Minted });
        assert!(classify(
            &ticket(true, Some("W1"), TicketStatus::Burned),
            Some(&chain("W1", true)),
        )
        .is_none());
    }

    #[test]
    fn matching_state_is_consistent() {
        assert!(classify(
            &ticket(true, Some("W1"), TicketStatus::Minted),
            Some(&chain("W1", false)),
        )
        .is_none());
    }
}
