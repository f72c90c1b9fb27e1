//! Scenario command - scripted tour of the storefront

use anyhow::Result;
use shopkit_lib::{ProductId, ReceiptInfo, UserId};
use std::path::Path;

use super::buy::{answer_prompt, report};
use super::{print_balances, Shop};
use crate::catalog::CatalogConfig;
use crate::ui;

pub async fn run(storage_dir: &Path, verbose: bool) -> Result<()> {
    ui::header("Shopkit scenario");

    let scratch = storage_dir.join(format!("scenario-{}", uuid::Uuid::new_v4()));
    let catalog = CatalogConfig::builtin();
    let result = play(&scratch, &catalog, verbose).await;
    if let Err(e) = std::fs::remove_dir_all(&scratch) {
        tracing::debug!(error = %e, "scenario storage not removed");
    }
    result
}

async fn play(storage_dir: &Path, catalog: &CatalogConfig, verbose: bool) -> Result<()> {
    let user = UserId(1);
    let shop = Shop::open(storage_dir, catalog)?;
    let events = shop.store.events();
    events.currency_added.connect(|event| {
        ui::info(&format!("  event: +{} {} for user {}", event.amount, event.currency, event.user))
    });
    events.purchase_completed.connect(|event| {
        ui::info(&format!("  event: {} completed for user {}", event.purchase_name, event.user))
    });
    events.purchase_failed.connect(|event| {
        ui::info(&format!(
            "  event: {} failed for user {} ({})",
            event.purchase_name, event.user, event.reason
        ))
    });

    step("User joins");
    shop.store.player_joined(user).await?;
    print_balances(&shop.store, user);

    step("Buy 100 Gems and deliver the receipt");
    let seen = shop.provider.prompt_count();
    let handle = shop.store.purchase("Gems:100", user);
    answer_prompt(&shop, user, seen, true).await;
    report(&handle.wait().await);
    let receipt = ReceiptInfo::new(user, ProductId(555), "scenario-txn-1");
    if verbose {
        ui::json(&serde_json::to_value(&receipt)?);
    }
    let decision = shop.store.process_receipt(receipt.clone()).await;
    ui::key_value("Receipt", &format!("{:?}", decision));
    print_balances(&shop.store, user);

    step("Redeliver the same receipt");
    let decision = shop.store.process_receipt(receipt).await;
    ui::key_value("Receipt", &format!("{:?}", decision));
    print_balances(&shop.store, user);

    step("Invoke the same subscription twice");
    let seen = shop.provider.prompt_count();
    let first = shop.store.purchase("VIP (Robux)", user);
    let second = shop.store.purchase("VIP (Robux)", user);
    let premium = shop.store.purchase("VIP (Premium)", user);
    report(&second.wait().await);
    answer_prompt(&shop, user, seen, false).await;
    answer_prompt(&shop, user, seen + 1, false).await;
    report(&first.wait().await);
    report(&premium.wait().await);

    step("Queue two swords");
    let seen = shop.provider.prompt_count();
    let swords = [
        shop.store.enqueue_product(user, "Starter Sword", false),
        shop.store.enqueue_product(user, "Starter Sword", false),
    ];
    ui::key_value("Waiting", &shop.store.queue_len(user).to_string());
    for (i, sword) in swords.iter().enumerate() {
        answer_prompt(&shop, user, seen + i, true).await;
        report(&sword.wait().await);
    }

    step("Disable transactions");
    shop.store.set_can_transact(false);
    report(&shop.store.purchase("Gems:500", user).wait().await);
    let decision = shop
        .store
        .process_receipt(ReceiptInfo::new(user, ProductId(556), "scenario-txn-2"))
        .await;
    ui::key_value("Receipt", &format!("{:?}", decision));
    shop.store.set_can_transact(true);

    step("Leave and rejoin");
    shop.leave(user).await?;
    shop.store.player_joined(user).await?;
    print_balances(&shop.store, user);
    shop.leave(user).await?;

    ui::separator();
    ui::success("Scenario finished");
    Ok(())
}

fn step(title: &str) {
    ui::separator();
    ui::info(title);
}
