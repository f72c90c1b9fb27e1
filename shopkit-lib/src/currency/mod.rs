//! Virtual currency definitions.
//!
//! Currencies are registered once at startup and never removed. Registering an
//! id that already exists keeps the original definition and logs a warning.

mod ledger;

pub use ledger::Ledger;

use crate::{ProductId, Result, ShopkitError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Which side of the amount the abbreviation is rendered on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbbreviationPlacement {
    Prefix,
    #[default]
    Suffix,
}

/// A registered virtual currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDefinition {
    /// Unique key; also the field name in the persisted profile.
    pub id: String,
    pub display_name: String,
    pub abbreviation: String,
    #[serde(default)]
    pub abbreviation_placement: AbbreviationPlacement,
    /// Balance a new profile starts with.
    #[serde(default)]
    pub default_value: i64,
    /// Pack size to the product that sells it.
    #[serde(default)]
    pub price_points: BTreeMap<i64, ProductId>,
}

impl CurrencyDefinition {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        abbreviation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            abbreviation: abbreviation.into(),
            abbreviation_placement: AbbreviationPlacement::default(),
            default_value: 0,
            price_points: BTreeMap::new(),
        }
    }

    pub fn with_default_value(mut self, value: i64) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_placement(mut self, placement: AbbreviationPlacement) -> Self {
        self.abbreviation_placement = placement;
        self
    }

    pub fn with_price_point(mut self, amount: i64, product: ProductId) -> Self {
        self.price_points.insert(amount, product);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ShopkitError::invalid_input("currency id", "cannot be empty"));
        }
        if let Some(amount) = self.price_points.keys().find(|a| **a <= 0) {
            return Err(ShopkitError::invalid_input(
                "price point",
                format!("{} amount {} must be positive", self.id, amount),
            ));
        }
        Ok(())
    }

    /// Name of the purchase registered for a price point.
    pub fn pack_purchase_name(&self, amount: i64) -> String {
        format!("{}:{}", self.id, amount)
    }

    /// Render an amount with the abbreviation on the configured side.
    ///
    /// ```
    /// use shopkit_lib::{AbbreviationPlacement, CurrencyDefinition};
    ///
    /// let gems = CurrencyDefinition::new("Gems", "Gems", "G");
    /// assert_eq!(gems.format(100), "100 G");
    ///
    /// let coins = gems.with_placement(AbbreviationPlacement::Prefix);
    /// assert_eq!(coins.format(5), "G5");
    /// ```
    pub fn format(&self, amount: i64) -> String {
        match self.abbreviation_placement {
            AbbreviationPlacement::Prefix => format!("{}{}", self.abbreviation, amount),
            AbbreviationPlacement::Suffix => format!("{} {}", amount, self.abbreviation),
        }
    }
}

/// Process-wide currency table.
#[derive(Default)]
pub struct CurrencyRegistry {
    currencies: RwLock<HashMap<String, Arc<CurrencyDefinition>>>,
}

impl CurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a currency. Returns false (and keeps the original) if the id
    /// is already registered.
    pub fn register(&self, definition: CurrencyDefinition) -> bool {
        let mut currencies = self.currencies.write().unwrap_or_else(|e| e.into_inner());
        if currencies.contains_key(&definition.id) {
            tracing::warn!(currency = %definition.id, "currency already registered, ignoring");
            return false;
        }
        tracing::debug!(currency = %definition.id, "registered currency");
        currencies.insert(definition.id.clone(), Arc::new(definition));
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<CurrencyDefinition>> {
        let currencies = self.currencies.read().unwrap_or_else(|e| e.into_inner());
        currencies.get(id).cloned()
    }

    pub fn get_required(&self, id: &str) -> Result<Arc<CurrencyDefinition>> {
        self.get(id)
            .ok_or_else(|| ShopkitError::not_registered("currency", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        let currencies = self.currencies.read().unwrap_or_else(|e| e.into_inner());
        currencies.contains_key(id)
    }

    /// Registered currency ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let currencies = self.currencies.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = currencies.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Default balances of every registered currency, used to reconcile
    /// freshly loaded profiles.
    pub fn defaults(&self) -> BTreeMap<String, i64> {
        let currencies = self.currencies.read().unwrap_or_else(|e| e.into_inner());
        currencies
            .values()
            .map(|c| (c.id.clone(), c.default_value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.currencies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
