//! Memo-keyed payment auto-matching.
//!
//! Withdrawals quote the transfer id as the payment memo. This adapter
//! watches the distribution account and drives the matching transfer to
//! `pending_stellar` when the payment lands, so operators do not build
//! their own watcher.

use async_trait::async_trait;
use std::sync::Arc;

use crate::anchor::manager::{PaymentReceivedDetails, TransferManager};
use crate::errors::{AnchorError, ErrorCode, Result};
use crate::observer::events::{with_destination, PaymentEvent, PaymentHandler};
use crate::observer::horizon::HorizonObserver;

struct AutoMatchHandler {
    manager: Arc<TransferManager>,
}

#[async_trait]
impl PaymentHandler for AutoMatchHandler {
    async fn handle(&self, event: PaymentEvent) -> Result<()> {
        let transfer_id = event.memo.clone();
        if transfer_id.is_empty() {
            log::info!(
                "payment {}: received to distribution account but has no memo, skipping",
                event.id
            );
            return Ok(());
        }

        let details = PaymentReceivedDetails {
            stellar_tx_hash: event.transaction_hash.clone(),
            amount: event.amount.clone(),
            asset_code: event.asset.clone(),
        };
        // Stale payments (terminal transfers) surface as transition errors;
        // log and keep streaming.
        if let Err(e) = self
            .manager
            .notify_payment_received(&transfer_id, details)
            .await
        {
            log::warn!(
                "payment {}: failed to notify transfer {}: {}",
                event.id,
                transfer_id,
                e
            );
            return Ok(());
        }

        log::info!(
            "payment {}: matched transfer {}, amount {} {}",
            event.id,
            transfer_id,
            event.amount,
            event.asset
        );
        Ok(())
    }
}

/// Wire an observer to a transfer manager: payments into the distribution
/// account are matched to withdrawals by memo and notified automatically.
pub fn auto_match_payments(
    observer: &HorizonObserver,
    manager: Arc<TransferManager>,
    distribution_account: &str,
) -> Result<()> {
    if distribution_account.trim().is_empty() {
        return Err(AnchorError::anchor(
            ErrorCode::ConfigInvalid,
            "distribution account is empty",
        ));
    }

    observer.on_payment(
        Arc::new(AutoMatchHandler { manager }),
        vec![with_destination(distribution_account)],
    );
    Ok(())
}
