//! Balance command - show or change a user's currency balances

use anyhow::{bail, Result};
use shopkit_lib::UserId;
use std::path::Path;

use super::{print_balances, Shop};
use crate::catalog::CatalogConfig;
use crate::ui;

/// A balance change requested on the command line.
#[derive(Clone, Copy, Debug)]
pub enum Adjustment {
    Grant(i64),
    Spend(i64),
    Set(i64),
}

pub async fn run(
    storage_dir: &Path,
    catalog: &CatalogConfig,
    user: UserId,
    change: Option<(&str, Adjustment)>,
) -> Result<()> {
    ui::header(&format!("Balances of user {}", user));

    let shop = Shop::open(storage_dir, catalog)?;
    shop.store.player_joined(user).await?;

    if let Some((currency, adjustment)) = change {
        if !shop.store.currencies().contains(currency) {
            shop.leave(user).await?;
            bail!("Unknown currency: {}", currency);
        }
        let result = match adjustment {
            Adjustment::Grant(amount) => shop.store.add_currency(user, currency, amount),
            Adjustment::Spend(amount) => shop.store.deduct_currency(user, currency, amount),
            Adjustment::Set(amount) => shop.store.set_currency(user, currency, amount),
        };
        match result {
            Ok(balance) => ui::success(&format!("{} is now {}", currency, balance)),
            Err(e) => ui::error(&format!("{:?} rejected: {}", adjustment, e)),
        }
        ui::separator();
    }

    print_balances(&shop.store, user);
    shop.leave(user).await
}
