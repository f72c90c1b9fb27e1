//! Simulated collaborators for demos and tests.
//!
//! [`SimulatedProvider`] records every prompt instead of showing UI; the
//! caller decides the user's answer by calling
//! [`Storefront::product_purchase_finished`](crate::Storefront::product_purchase_finished).
//! [`RecordingHost`] records kicks and lets tests mark users as gone.

use crate::provider::PaymentProvider;
use crate::session::SessionHost;
use crate::{EntitlementId, ProductId, PurchaseTarget, UserId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;

/// A prompt the provider was asked to show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PromptRecord {
    pub user: UserId,
    pub target: PurchaseTarget,
}

/// Payment provider that only records prompts.
pub struct SimulatedProvider {
    prompts: Mutex<Vec<PromptRecord>>,
    prompt_count: watch::Sender<usize>,
    owned: RwLock<HashSet<(UserId, EntitlementId)>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        let (prompt_count, _) = watch::channel(0);
        Self {
            prompts: Mutex::new(Vec::new()),
            prompt_count,
            owned: RwLock::new(HashSet::new()),
        }
    }

    /// Mark an entitlement as owned, so entitlement flows short-circuit.
    pub fn grant_entitlement(&self, user: UserId, entitlement: EntitlementId) {
        let mut owned = self.owned.write().unwrap_or_else(|e| e.into_inner());
        owned.insert((user, entitlement));
    }

    pub fn prompts(&self) -> Vec<PromptRecord> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn prompt_count(&self) -> usize {
        *self.prompt_count.borrow()
    }

    /// Prompts issued to one user for one target.
    pub fn prompts_for(&self, user: UserId, target: PurchaseTarget) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.user == user && p.target == target)
            .count()
    }

    /// Wait until at least `count` prompts have been issued in total.
    pub async fn wait_for_prompts(&self, count: usize) {
        let mut rx = self.prompt_count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|issued| *issued >= count).await;
    }

    fn record(&self, user: UserId, target: PurchaseTarget) {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PromptRecord { user, target });
        self.prompt_count.send_modify(|count| *count += 1);
        tracing::debug!(%user, %target, "simulated prompt shown");
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn prompt_product_purchase(&self, user: UserId, product: ProductId) {
        self.record(user, PurchaseTarget::Product(product));
    }

    fn prompt_entitlement_purchase(&self, user: UserId, entitlement: EntitlementId) {
        self.record(user, PurchaseTarget::Entitlement(entitlement));
    }

    async fn user_owns_entitlement(&self, user: UserId, entitlement: EntitlementId) -> bool {
        let owned = self.owned.read().unwrap_or_else(|e| e.into_inner());
        owned.contains(&(user, entitlement))
    }
}

/// Session host that records kicks.
#[derive(Default)]
pub struct RecordingHost {
    kicks: Mutex<Vec<(UserId, String)>>,
    absent: RwLock<HashSet<UserId>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kicks(&self) -> Vec<(UserId, String)> {
        self.kicks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn was_kicked(&self, user: UserId) -> bool {
        self.kicks().iter().any(|(kicked, _)| *kicked == user)
    }

    /// Mark a user as connected or gone.
    pub fn set_present(&self, user: UserId, present: bool) {
        let mut absent = self.absent.write().unwrap_or_else(|e| e.into_inner());
        if present {
            absent.remove(&user);
        } else {
            absent.insert(user);
        }
    }
}

impl SessionHost for RecordingHost {
    fn kick(&self, user: UserId, reason: &str) {
        tracing::info!(%user, reason, "user kicked");
        self.kicks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user, reason.to_string()));
    }

    fn is_present(&self, user: UserId) -> bool {
        let absent = self.absent.read().unwrap_or_else(|e| e.into_inner());
        !absent.contains(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_records_prompts() {
        let provider = SimulatedProvider::new();
        provider.prompt_product_purchase(UserId(1), ProductId(10));
        provider.prompt_entitlement_purchase(UserId(1), EntitlementId(20));
        provider.wait_for_prompts(2).await;

        assert_eq!(provider.prompt_count(), 2);
        assert_eq!(
            provider.prompts_for(UserId(1), PurchaseTarget::Product(ProductId(10))),
            1
        );
    }

    #[tokio::test]
    async fn test_owned_entitlements() {
        let provider = SimulatedProvider::new();
        assert!(!provider.user_owns_entitlement(UserId(1), EntitlementId(5)).await);
        provider.grant_entitlement(UserId(1), EntitlementId(5));
        assert!(provider.user_owns_entitlement(UserId(1), EntitlementId(5)).await);
        assert!(!provider.user_owns_entitlement(UserId(2), EntitlementId(5)).await);
    }

    #[test]
    fn test_host_presence_and_kicks() {
        let host = RecordingHost::new();
        assert!(host.is_present(UserId(1)));
        host.set_present(UserId(1), false);
        assert!(!host.is_present(UserId(1)));

        host.kick(UserId(1), "bye");
        assert!(host.was_kicked(UserId(1)));
        assert_eq!(host.kicks()[0].1, "bye");
    }
}
