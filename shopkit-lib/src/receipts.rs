//! Exactly-once receipt processing.
//!
//! The provider redelivers a receipt until it is answered with
//! [`ReceiptDecision::PurchaseGranted`]. That answer is only given once the
//! purchase id is recorded in the user's profile and the profile is saved.
//! A crash before the save loses both the grant and the record, and the
//! redelivery grants again.
//!
//! While a receipt is being processed its purchase id is marked in flight; a
//! concurrent redelivery of the same id is told `NotProcessedYet`.
//!
//! The id is only recorded while the session is still open. A leave that
//! races the grant either snapshots the grant with its id or drops both.
//! Currency packs credit the balance and record the id under the same lock.
//! A user callback's own effects are outside that lock, so a leave landing
//! mid-callback can still let a redelivery run the callback again.

use crate::events::PurchaseCompleted;
use crate::flows::run_callback;
use crate::registry::ReceiptGrant;
use crate::session::{self, lock_session, SharedSession};
use crate::storefront::Context;
use crate::{PurchaseTarget, ReceiptDecision, ReceiptInfo, Result, ShopkitError};
use std::collections::HashSet;
use std::sync::Mutex;

/// Purchase name reported for receipts whose binding carries none.
pub const RECEIPT_PURCHASE_NAME: &str = "receipt";

/// Purchase ids currently being processed.
#[derive(Default)]
pub(crate) struct InFlightReceipts {
    ids: Mutex<HashSet<String>>,
}

impl InFlightReceipts {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self, purchase_id: &str) -> bool {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(purchase_id.to_string())
    }

    fn finish(&self, purchase_id: &str) {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(purchase_id);
    }
}

/// Decide a receipt delivery.
pub(crate) async fn process_receipt(ctx: &Context, receipt: &ReceiptInfo) -> ReceiptDecision {
    if !ctx.in_flight_receipts.try_claim(&receipt.purchase_id) {
        tracing::info!(
            user = %receipt.user,
            purchase_id = %receipt.purchase_id,
            "receipt already being processed"
        );
        return ReceiptDecision::NotProcessedYet;
    }
    let decision = decide(ctx, receipt).await;
    ctx.in_flight_receipts.finish(&receipt.purchase_id);
    decision
}

async fn decide(ctx: &Context, receipt: &ReceiptInfo) -> ReceiptDecision {
    let user = receipt.user;
    let purchase_id = receipt.purchase_id.as_str();
    let product = receipt.product_id;

    if !ctx.can_transact(user) {
        tracing::info!(%user, purchase_id, "transactions disabled, deferring receipt");
        return ReceiptDecision::NotProcessedYet;
    }

    let Some(session) = ctx.sessions.get(user) else {
        tracing::info!(%user, purchase_id, "no session yet, deferring receipt");
        return ReceiptDecision::NotProcessedYet;
    };

    let already_granted = lock_session(&session)
        .document
        .has_processed_receipt(purchase_id);
    if already_granted {
        // Granted earlier; the save may not have gone through then.
        return match session::save(ctx, user).await {
            Ok(()) => {
                tracing::info!(%user, purchase_id, "receipt already granted");
                ReceiptDecision::PurchaseGranted
            }
            Err(e) => {
                tracing::error!(%user, purchase_id, error = %e, "failed to persist receipt");
                ReceiptDecision::NotProcessedYet
            }
        };
    }

    let Some(binding) = ctx.receipt_callbacks.get(product) else {
        tracing::warn!(%user, %product, purchase_id, "no receipt callback bound for product");
        return ReceiptDecision::NotProcessedYet;
    };

    let history_limit = ctx.config.receipt_history_limit;
    let granted = match &binding.grant {
        ReceiptGrant::Callback(callback) => run_callback(|| callback(receipt))
            .and_then(|()| record_receipt(&session, receipt, history_limit)),
        ReceiptGrant::Currency { currency, amount } => ctx
            .ledger()
            .credit_receipt(receipt, currency, *amount, history_limit)
            .map(|_| ()),
    };
    if let Err(e) = granted {
        tracing::error!(%user, %product, purchase_id, error = %e, "receipt grant failed");
        return ReceiptDecision::NotProcessedYet;
    }

    if let Err(e) = session::save(ctx, user).await {
        // The id stays recorded in memory; a redelivery retries the save
        // without granting again.
        tracing::error!(%user, purchase_id, error = %e, "failed to persist receipt");
        return ReceiptDecision::NotProcessedYet;
    }

    if let ReceiptGrant::Currency { .. } = binding.grant {
        tracing::info!(
            %user,
            %product,
            purchase_id,
            purchase = %binding.purchase_name,
            "currency pack granted"
        );
        return ReceiptDecision::PurchaseGranted;
    }

    let purchase_name = if binding.purchase_name.is_empty() {
        RECEIPT_PURCHASE_NAME.to_string()
    } else {
        binding.purchase_name.clone()
    };
    tracing::info!(%user, %product, purchase_id, purchase = %purchase_name, "receipt granted");
    ctx.events.purchase_completed.fire(&PurchaseCompleted {
        user,
        target: PurchaseTarget::Product(product),
        purchase_name,
    });
    ReceiptDecision::PurchaseGranted
}

/// Record a granted receipt, unless a leave closed the session meanwhile.
fn record_receipt(session: &SharedSession, receipt: &ReceiptInfo, limit: usize) -> Result<()> {
    let mut session = lock_session(session);
    if session.closed {
        return Err(ShopkitError::NoSession(receipt.user));
    }
    session.document.record_processed_receipt(receipt.purchase_id.as_str(), limit);
    Ok(())
}
