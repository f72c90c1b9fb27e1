//! Buy command - run a purchase flow against the simulated provider

use anyhow::Result;
use shopkit_lib::{HandleOutcome, PurchaseTarget, ReceiptDecision, ReceiptInfo, UserId};
use std::path::Path;
use std::time::Duration;

use super::{print_balances, Shop};
use crate::catalog::CatalogConfig;
use crate::ui;

/// How long to wait for a flow to reach its prompt.
const PROMPT_WAIT: Duration = Duration::from_secs(1);

pub async fn run(
    storage_dir: &Path,
    catalog: &CatalogConfig,
    user: UserId,
    purchase: &str,
    decline: bool,
    queue: bool,
    verbose: bool,
) -> Result<()> {
    ui::header(&format!("Buy {}", purchase));

    let shop = Shop::open(storage_dir, catalog)?;
    shop.store.player_joined(user).await?;

    let handle = if queue {
        shop.store.enqueue_product(user, purchase, false)
    } else {
        shop.store.purchase(purchase, user)
    };

    let answered = answer_prompt(&shop, user, 0, !decline).await;
    let outcome = handle.wait().await;
    report(&outcome);

    if outcome.success {
        if let Some(PurchaseTarget::Product(product)) = answered {
            if shop.store.is_receipt_bound(product) {
                let receipt = ReceiptInfo::new(user, product, uuid::Uuid::new_v4().to_string());
                if verbose {
                    ui::json(&serde_json::to_value(&receipt)?);
                }
                match shop.store.process_receipt(receipt).await {
                    ReceiptDecision::PurchaseGranted => ui::success("Receipt granted"),
                    ReceiptDecision::NotProcessedYet => {
                        ui::warning("Receipt deferred; the provider would redeliver it")
                    }
                }
            }
        }
    }

    ui::separator();
    print_balances(&shop.store, user);
    shop.leave(user).await
}

/// Answer the next prompt issued after `seen` prompts, as the user would.
///
/// Returns the prompted target, or `None` when the flow finished without one.
pub async fn answer_prompt(
    shop: &Shop,
    user: UserId,
    seen: usize,
    purchased: bool,
) -> Option<PurchaseTarget> {
    if tokio::time::timeout(PROMPT_WAIT, shop.provider.wait_for_prompts(seen + 1))
        .await
        .is_err()
    {
        return None;
    }
    let prompt = shop
        .provider
        .prompts()
        .into_iter()
        .skip(seen)
        .find(|prompt| prompt.user == user)?;

    ui::info(&format!(
        "Prompt shown to user {} for {}; answering {}",
        user,
        prompt.target,
        if purchased { "buy" } else { "cancel" }
    ));
    match prompt.target {
        PurchaseTarget::Product(product) => {
            shop.store
                .product_purchase_finished(user, product, purchased);
        }
        PurchaseTarget::Entitlement(entitlement) => {
            shop.store
                .entitlement_purchase_finished(user, entitlement, purchased);
        }
    }
    Some(prompt.target)
}

pub fn report(outcome: &HandleOutcome) {
    match &outcome.error {
        None if outcome.success => ui::success("Purchase completed"),
        Some(reason) if outcome.success => ui::success(&format!("Purchase completed ({})", reason)),
        Some(reason) => ui::error(&format!("Purchase failed: {}", reason)),
        None => ui::error("Purchase failed"),
    }
}
