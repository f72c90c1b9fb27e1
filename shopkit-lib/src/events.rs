//! Broadcast signals for storefront events.
//!
//! Each [`Signal`] keeps an ordered listener list and fans out synchronously,
//! in connection order. Firing iterates over a snapshot of the list, so a
//! listener that connects or disconnects mid-fire cannot disturb the current
//! delivery. There is no buffering: a listener only sees events fired while it
//! is connected.
//!
//! # Thread Safety
//!
//! Listener lists sit behind `RwLock`. Lock poisoning is recovered from rather
//! than propagated, since the list itself cannot be left half-updated.

use crate::{PurchaseTarget, UserId};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// A connected listener. Keep the returned `Arc` to disconnect later.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// `CurrencyAdded(user, currency_id, amount)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAdded {
    pub user: UserId,
    pub currency: String,
    pub amount: i64,
}

/// `CurrencyDeducted(user, currency_id, amount)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDeducted {
    pub user: UserId,
    pub currency: String,
    pub amount: i64,
}

/// `PurchaseCompleted(user, product_or_entitlement_id, purchase_name)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCompleted {
    pub user: UserId,
    pub target: PurchaseTarget,
    pub purchase_name: String,
}

/// `PurchaseFailed(user, product_or_entitlement_id, purchase_name, reason)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFailed {
    pub user: UserId,
    pub target: PurchaseTarget,
    pub purchase_name: String,
    pub reason: String,
}

/// `ProfileLoaded(user)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileLoaded {
    pub user: UserId,
}

/// One named broadcast channel.
pub struct Signal<T> {
    name: &'static str,
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> Signal<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Connect a closure; returns the listener handle used to disconnect it.
    pub fn connect<F>(&self, listener: F) -> Listener<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        self.connect_listener(listener.clone());
        listener
    }

    /// Connect an existing listener. The same listener may be connected twice.
    pub fn connect_listener(&self, listener: Listener<T>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    /// Remove the first registration of `listener`.
    ///
    /// Returns false if it was not connected.
    pub fn disconnect(&self, listener: &Listener<T>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every connected listener, in connection order.
    ///
    /// A panicking listener is logged and skipped; later listeners still run.
    /// Returns the number of listeners invoked.
    pub fn fire(&self, event: &T) -> usize {
        let snapshot: Vec<Listener<T>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.clone()
        };

        for listener in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(signal = self.name, "event listener panicked");
            }
        }
        snapshot.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The five storefront signals.
pub struct EventBus {
    pub currency_added: Signal<CurrencyAdded>,
    pub currency_deducted: Signal<CurrencyDeducted>,
    pub purchase_completed: Signal<PurchaseCompleted>,
    pub purchase_failed: Signal<PurchaseFailed>,
    pub profile_loaded: Signal<ProfileLoaded>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            currency_added: Signal::new("currency_added"),
            currency_deducted: Signal::new("currency_deducted"),
            purchase_completed: Signal::new("purchase_completed"),
            purchase_failed: Signal::new("purchase_failed"),
            profile_loaded: Signal::new("profile_loaded"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
