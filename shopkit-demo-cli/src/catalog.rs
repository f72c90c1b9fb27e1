//! Catalog file: engine settings plus everything registered at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shopkit_lib::{
    CurrencyDefinition, EntitlementId, ProductId, PurchaseCallbacks, ShopkitConfig, Storefront,
    SubscriptionVariant,
};
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub engine: ShopkitConfig,
    #[serde(default)]
    pub currencies: Vec<CurrencyDefinition>,
    #[serde(default)]
    pub products: Vec<ProductEntry>,
    #[serde(default)]
    pub entitlements: Vec<EntitlementEntry>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductEntry {
    pub name: String,
    pub id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntitlementEntry {
    pub name: String,
    pub id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub name: String,
    pub id: u64,
    /// Absent for a generic subscription.
    #[serde(default)]
    pub variant: Option<SubscriptionVariant>,
}

impl CatalogConfig {
    /// Load a catalog, or fall back to the built-in one when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog: Self = serde_json::from_str(&json)
            .with_context(|| format!("Invalid catalog {}", path.display()))?;
        catalog.engine.validate()?;
        Ok(catalog)
    }

    /// The catalog used when none is supplied.
    pub fn builtin() -> Self {
        Self {
            engine: ShopkitConfig::default().with_purchase_timeout(5),
            currencies: vec![
                CurrencyDefinition::new("Gems", "Gems", "G")
                    .with_price_point(100, ProductId(555))
                    .with_price_point(500, ProductId(556)),
                CurrencyDefinition::new("Coins", "Coins", "C").with_default_value(50),
            ],
            products: vec![ProductEntry {
                name: "Starter Sword".into(),
                id: 700,
            }],
            entitlements: vec![EntitlementEntry {
                name: "Double XP".into(),
                id: 42,
            }],
            subscriptions: vec![
                SubscriptionEntry {
                    name: "Season Pass".into(),
                    id: 800,
                    variant: None,
                },
                SubscriptionEntry {
                    name: "VIP (Robux)".into(),
                    id: 801,
                    variant: Some(SubscriptionVariant::Currency),
                },
                SubscriptionEntry {
                    name: "VIP (Premium)".into(),
                    id: 802,
                    variant: Some(SubscriptionVariant::Premium),
                },
            ],
        }
    }

    /// Register every entry with the storefront.
    pub fn register(&self, store: &Storefront) -> Result<()> {
        for currency in &self.currencies {
            if !store.register_currency(currency.clone())? {
                tracing::warn!(currency = %currency.id, "duplicate currency in catalog");
            }
        }
        for product in &self.products {
            let name = product.name.clone();
            store.register_product(
                product.name.clone(),
                ProductId(product.id),
                PurchaseCallbacks::none().on_fulfill(move |user| {
                    tracing::info!(%user, product = %name, "item granted");
                    Ok(true)
                }),
            );
        }
        for entitlement in &self.entitlements {
            store.register_entitlement(
                entitlement.name.clone(),
                EntitlementId(entitlement.id),
                PurchaseCallbacks::none(),
            );
        }
        for subscription in &self.subscriptions {
            let product = ProductId(subscription.id);
            match subscription.variant {
                Some(variant) => store.register_subscription_variant(
                    variant,
                    subscription.name.clone(),
                    product,
                    PurchaseCallbacks::none(),
                ),
                None => store.register_subscription(
                    subscription.name.clone(),
                    product,
                    PurchaseCallbacks::none(),
                ),
            };
        }
        Ok(())
    }
}
