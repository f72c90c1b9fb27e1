//! Payment provider seam.
//!
//! The provider owns the user-facing purchase UI. Shopkit only triggers
//! prompts and listens for the completion events the host forwards back
//! through [`Storefront::product_purchase_finished`] and
//! [`Storefront::entitlement_purchase_finished`]. Each waiting flow registers
//! for its `(user, target)` pair and only receives that pair's completions.
//!
//! [`Storefront::product_purchase_finished`]: crate::Storefront::product_purchase_finished
//! [`Storefront::entitlement_purchase_finished`]: crate::Storefront::entitlement_purchase_finished

use crate::{EntitlementId, ProductId, PurchaseTarget, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// How a flow prompts the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// One-shot consumable product.
    Product,
    /// Permanent entitlement; may be prompted repeatedly until owned.
    Entitlement,
}

/// External payment/entitlement provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Show the purchase UI for a product. Fire-and-forget.
    fn prompt_product_purchase(&self, user: UserId, product: ProductId);

    /// Show the purchase UI for an entitlement. Fire-and-forget.
    fn prompt_entitlement_purchase(&self, user: UserId, entitlement: EntitlementId);

    /// Whether the user already owns the entitlement.
    async fn user_owns_entitlement(&self, _user: UserId, _entitlement: EntitlementId) -> bool {
        false
    }
}

/// A payment receipt delivered asynchronously by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub user: UserId,
    pub product_id: ProductId,
    /// Provider-unique id of this purchase; the exactly-once key.
    pub purchase_id: String,
}

impl ReceiptInfo {
    pub fn new(user: UserId, product_id: ProductId, purchase_id: impl Into<String>) -> Self {
        Self {
            user,
            product_id,
            purchase_id: purchase_id.into(),
        }
    }
}

/// Answer to a receipt delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptDecision {
    /// Granted and persisted; the provider must not redeliver.
    PurchaseGranted,
    /// Not handled; the provider will retry delivery later.
    NotProcessedYet,
}

/// A provider report that an interactive prompt finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PromptCompletion {
    pub user: UserId,
    pub target: PurchaseTarget,
    pub purchased: bool,
}

/// Per-flow registrations, keyed by the pair they wait on.
type WaiterMap = HashMap<(UserId, PurchaseTarget), Vec<(u64, mpsc::Sender<bool>)>>;

/// Routes prompt completions to the flows waiting on them.
///
/// Each waiter gets its own bounded channel, so completions for other
/// users or targets never reach it and cannot crowd out its own.
pub(crate) struct CompletionHub {
    waiters: Arc<Mutex<WaiterMap>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl CompletionHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Publish a completion; returns the number of flows it reached.
    pub(crate) fn publish(&self, completion: PromptCompletion) -> usize {
        let waiters = lock_waiters(&self.waiters);
        let Some(senders) = waiters.get(&(completion.user, completion.target)) else {
            // No flow is waiting, which is not an error.
            return 0;
        };
        let mut delivered = 0;
        for (_, sender) in senders {
            match sender.try_send(completion.purchased) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    user = %completion.user,
                    target = %completion.target,
                    error = %e,
                    "completion dropped"
                ),
            }
        }
        delivered
    }

    /// Start listening for one `(user, target)` pair.
    ///
    /// Must be called before the prompt is issued so an immediate completion
    /// is not missed.
    pub(crate) fn subscribe(&self, user: UserId, target: PurchaseTarget) -> CompletionWaiter {
        let (sender, receiver) = mpsc::channel(self.capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_waiters(&self.waiters)
            .entry((user, target))
            .or_default()
            .push((id, sender));
        CompletionWaiter {
            receiver,
            waiters: Arc::downgrade(&self.waiters),
            id,
            user,
            target,
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock_waiters(&self.waiters).values().map(Vec::len).sum()
    }
}

fn lock_waiters(waiters: &Mutex<WaiterMap>) -> MutexGuard<'_, WaiterMap> {
    waiters.lock().unwrap_or_else(|e| e.into_inner())
}

/// One flow's registration with the completion hub. Dropping it
/// unsubscribes.
pub(crate) struct CompletionWaiter {
    receiver: mpsc::Receiver<bool>,
    waiters: Weak<Mutex<WaiterMap>>,
    id: u64,
    user: UserId,
    target: PurchaseTarget,
}

impl CompletionWaiter {
    /// Wait for the next completion for this waiter's pair.
    ///
    /// Returns `None` if the hub shut down.
    pub(crate) async fn next_match(&mut self) -> Option<bool> {
        self.receiver.recv().await
    }
}

impl Drop for CompletionWaiter {
    fn drop(&mut self) {
        let Some(waiters) = self.waiters.upgrade() else {
            return;
        };
        let mut waiters = lock_waiters(&waiters);
        let key = (self.user, self.target);
        if let Some(senders) = waiters.get_mut(&key) {
            senders.retain(|(id, _)| *id != self.id);
            if senders.is_empty() {
                waiters.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_waiter_filters_by_user_and_target() {
        let hub = CompletionHub::new(16);
        let target = PurchaseTarget::Product(ProductId(10));
        let mut waiter = hub.subscribe(UserId(1), target);

        hub.publish(PromptCompletion {
            user: UserId(2),
            target,
            purchased: true,
        });
        hub.publish(PromptCompletion {
            user: UserId(1),
            target: PurchaseTarget::Product(ProductId(11)),
            purchased: true,
        });
        hub.publish(PromptCompletion {
            user: UserId(1),
            target,
            purchased: false,
        });

        assert_eq!(waiter.next_match().await, Some(false));
    }

    #[test]
    fn test_receipt_info_json_shape() {
        let receipt = ReceiptInfo::new(UserId(7), ProductId(555), "txn-1");
        let value = serde_json::to_value(&receipt).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["product_id", "purchase_id", "user"]);
        assert_eq!(serde_json::from_value::<ReceiptInfo>(value).unwrap(), receipt);
    }

    #[test]
    fn test_publish_without_listeners() {
        let hub = CompletionHub::new(4);
        let delivered = hub.publish(PromptCompletion {
            user: UserId(1),
            target: PurchaseTarget::Entitlement(EntitlementId(3)),
            purchased: true,
        });
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_dropping_waiter_unsubscribes() {
        let hub = CompletionHub::new(4);
        let waiter = hub.subscribe(UserId(1), PurchaseTarget::Product(ProductId(1)));
        assert_eq!(hub.listener_count(), 1);
        drop(waiter);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_burst_for_other_users_does_not_crowd_out_waiter() {
        let hub = CompletionHub::new(2);
        let target = PurchaseTarget::Product(ProductId(10));
        let mut waiter = hub.subscribe(UserId(1), target);
        let _busy = hub.subscribe(UserId(2), target);

        for _ in 0..100 {
            hub.publish(PromptCompletion {
                user: UserId(2),
                target,
                purchased: true,
            });
        }
        let delivered = hub.publish(PromptCompletion {
            user: UserId(1),
            target,
            purchased: true,
        });

        assert_eq!(delivered, 1);
        assert_eq!(waiter.next_match().await, Some(true));
    }

    #[test]
    fn test_publish_counts_matching_waiters_only() {
        let hub = CompletionHub::new(4);
        let target = PurchaseTarget::Product(ProductId(10));
        let _first = hub.subscribe(UserId(1), target);
        let _second = hub.subscribe(UserId(1), target);
        let _other = hub.subscribe(UserId(2), target);

        let delivered = hub.publish(PromptCompletion {
            user: UserId(1),
            target,
            purchased: false,
        });
        assert_eq!(delivered, 2);
        assert_eq!(hub.listener_count(), 3);
    }
}
