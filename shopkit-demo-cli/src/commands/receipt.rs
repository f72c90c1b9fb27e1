//! Receipt command - deliver a receipt as the provider would

use anyhow::Result;
use shopkit_lib::{ProductId, ReceiptDecision, ReceiptInfo, UserId};
use std::path::Path;

use super::{print_balances, Shop};
use crate::catalog::CatalogConfig;
use crate::ui;

pub async fn run(
    storage_dir: &Path,
    catalog: &CatalogConfig,
    user: UserId,
    product: u64,
    purchase_id: Option<String>,
) -> Result<()> {
    ui::header("Deliver receipt");

    let shop = Shop::open(storage_dir, catalog)?;
    shop.store.player_joined(user).await?;

    let purchase_id = purchase_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ui::key_value("Purchase id", &purchase_id);
    let receipt = ReceiptInfo::new(user, ProductId(product), purchase_id);

    match shop.store.process_receipt(receipt).await {
        ReceiptDecision::PurchaseGranted => ui::success("PurchaseGranted"),
        ReceiptDecision::NotProcessedYet => ui::warning("NotProcessedYet"),
    }

    ui::separator();
    print_balances(&shop.store, user);
    shop.leave(user).await
}
