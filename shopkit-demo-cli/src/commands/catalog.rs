//! Catalog command - list what is registered

use anyhow::Result;
use shopkit_lib::ShopkitConfig;

use crate::catalog::CatalogConfig;
use crate::ui;

pub fn run(catalog: &CatalogConfig, verbose: bool) -> Result<()> {
    ui::header("Catalog");

    ui::info("Currencies:");
    for currency in &catalog.currencies {
        ui::key_value(
            &currency.id,
            &format!(
                "{} ({}), default {}",
                currency.display_name,
                currency.abbreviation,
                currency.format(currency.default_value)
            ),
        );
        for (amount, product) in &currency.price_points {
            ui::key_value(
                &format!("  {}", currency.pack_purchase_name(*amount)),
                &format!("product {}", product),
            );
        }
    }

    ui::separator();
    ui::info("Products:");
    for product in &catalog.products {
        ui::key_value(&product.name, &format!("product {}", product.id));
    }

    ui::info("Entitlements:");
    for entitlement in &catalog.entitlements {
        ui::key_value(&entitlement.name, &format!("entitlement {}", entitlement.id));
    }

    ui::info("Subscriptions:");
    for subscription in &catalog.subscriptions {
        let kind = subscription
            .variant
            .map(|variant| variant.category().to_string())
            .unwrap_or_else(|| "subscription".into());
        ui::key_value(
            &subscription.name,
            &format!("product {} [{}]", subscription.id, kind),
        );
    }

    if verbose {
        ui::separator();
        ui::info("Engine settings:");
        ui::json(&serde_json::to_value(&catalog.engine)?);
        if catalog.engine != ShopkitConfig::default() {
            ui::info("(differs from the defaults)");
        }
    }
    Ok(())
}
