//! Purchase and receipt-callback registries.
//!
//! Both registries are filled during startup and only read afterwards.
//! Registration is first-wins: a second registration under the same key is
//! ignored with a warning and the original entry is returned.
//!
//! # Thread Safety
//!
//! The registries use `RwLock` and recover from lock poisoning, since every
//! write is a single map insert.

use crate::flows::FlowDefinition;
use crate::{AsyncHandle, ProductId, ReceiptInfo, UserId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Callable purchase flow: starts the flow for a user and returns its handle.
pub type PurchaseFn = Arc<dyn Fn(UserId) -> AsyncHandle + Send + Sync>;

/// Fulfils a paid receipt. `Err` (or a panic) leaves the receipt unprocessed
/// so the provider redelivers it.
pub type ReceiptCallback = Arc<dyn Fn(&ReceiptInfo) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct RegisteredPurchase {
    pub(crate) invoke: PurchaseFn,
    pub(crate) flow: Arc<FlowDefinition>,
}

/// Purchase name to flow.
#[derive(Default)]
pub(crate) struct PurchaseRegistry {
    purchases: RwLock<HashMap<String, RegisteredPurchase>>,
}

impl PurchaseRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a flow under its name; returns the flow function in effect.
    pub(crate) fn register(&self, flow: Arc<FlowDefinition>, invoke: PurchaseFn) -> PurchaseFn {
        let mut purchases = self.purchases.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = purchases.get(&flow.name) {
            tracing::warn!(purchase = %flow.name, "purchase already registered, keeping original");
            return existing.invoke.clone();
        }
        tracing::debug!(
            purchase = %flow.name,
            category = %flow.category,
            target = %flow.target,
            "registered purchase"
        );
        purchases.insert(
            flow.name.clone(),
            RegisteredPurchase {
                invoke: invoke.clone(),
                flow,
            },
        );
        invoke
    }

    pub(crate) fn get(&self, name: &str) -> Option<RegisteredPurchase> {
        let purchases = self.purchases.read().unwrap_or_else(|e| e.into_inner());
        purchases.get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let purchases = self.purchases.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = purchases.keys().cloned().collect();
        names.sort();
        names
    }
}

/// What a paid receipt grants.
#[derive(Clone)]
pub(crate) enum ReceiptGrant {
    /// Runs a user callback. The receipt reports the purchase.
    Callback(ReceiptCallback),
    /// Credits a currency pack. The pack's prompt flow reports the purchase.
    Currency { currency: String, amount: i64 },
}

#[derive(Clone)]
pub(crate) struct ReceiptBinding {
    pub(crate) purchase_name: String,
    pub(crate) grant: ReceiptGrant,
}

/// Product id to receipt fulfilment callback.
#[derive(Default)]
pub(crate) struct ReceiptCallbackRegistry {
    bindings: RwLock<HashMap<ProductId, ReceiptBinding>>,
}

impl ReceiptCallbackRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind a product. Returns false if it was already bound.
    pub(crate) fn bind(
        &self,
        product: ProductId,
        purchase_name: impl Into<String>,
        grant: ReceiptGrant,
    ) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        if bindings.contains_key(&product) {
            tracing::warn!(%product, "receipt callback already bound, keeping original");
            return false;
        }
        bindings.insert(
            product,
            ReceiptBinding {
                purchase_name: purchase_name.into(),
                grant,
            },
        );
        true
    }

    pub(crate) fn get(&self, product: ProductId) -> Option<ReceiptBinding> {
        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner());
        bindings.get(&product).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::PurchaseCallbacks;
    use crate::{GuardCategory, HandleOutcome, PromptKind, PurchaseTarget};

    fn definition(name: &str) -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition {
            name: name.to_string(),
            category: GuardCategory::Product,
            kind: PromptKind::Product,
            target: PurchaseTarget::Product(ProductId(1)),
            callbacks: PurchaseCallbacks::none(),
        })
    }

    #[test]
    fn test_duplicate_name_returns_original() {
        let registry = PurchaseRegistry::new();
        let first: PurchaseFn =
            Arc::new(|_: UserId| AsyncHandle::resolved(HandleOutcome::succeeded()));
        let second: PurchaseFn =
            Arc::new(|_: UserId| AsyncHandle::resolved(HandleOutcome::failed("second")));

        let kept = registry.register(definition("Sword"), first);
        let again = registry.register(definition("Sword"), second);

        assert!(again(UserId(1)).outcome().unwrap().success);
        assert!(kept(UserId(1)).outcome().unwrap().success);
        assert_eq!(registry.names(), vec!["Sword".to_string()]);
    }

    #[test]
    fn test_receipt_binding_first_wins() {
        let registry = ReceiptCallbackRegistry::new();
        let first = ReceiptGrant::Callback(Arc::new(|_: &ReceiptInfo| Ok(())));
        assert!(registry.bind(ProductId(5), "first", first));
        let second = ReceiptGrant::Currency {
            currency: "Gems".to_string(),
            amount: 100,
        };
        assert!(!registry.bind(ProductId(5), "second", second));

        let binding = registry.get(ProductId(5)).unwrap();
        assert_eq!(binding.purchase_name, "first");
        assert!(matches!(binding.grant, ReceiptGrant::Callback(_)));
        assert!(registry.get(ProductId(6)).is_none());
    }
}
