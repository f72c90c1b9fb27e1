//! Per-user transaction guards.
//!
//! A guard is a named boolean lock, one per purchase category. Holding the
//! `Product` guard means a product prompt is in flight for that user; a second
//! product flow must not start until it is released. Categories are
//! independent, so a subscription prompt and a product prompt may overlap.
//!
//! # Thread Safety
//!
//! Each user's state sits behind its own `Mutex`, held only for the
//! check-then-set of a guard or a queue mutation, never across an `.await`.

use crate::queue::QueuedInvocation;
use crate::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Purchase category guarded independently per user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardCategory {
    /// One-off developer products, including queued purchases.
    Product,
    /// Permanent entitlements (game passes).
    Entitlement,
    /// Generic subscriptions.
    Subscription,
    /// Subscription variant paid in the platform currency.
    CurrencySubscription,
    /// Subscription variant tied to the premium membership.
    PremiumSubscription,
}

impl GuardCategory {
    pub const ALL: [GuardCategory; 5] = [
        Self::Product,
        Self::Entitlement,
        Self::Subscription,
        Self::CurrencySubscription,
        Self::PremiumSubscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Entitlement => "entitlement",
            Self::Subscription => "subscription",
            Self::CurrencySubscription => "currency_subscription",
            Self::PremiumSubscription => "premium_subscription",
        }
    }
}

impl fmt::Display for GuardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of per-category in-flight flags for one user.
#[derive(Clone, Debug, Default)]
pub struct TransactionGuardSet {
    held: HashMap<GuardCategory, bool>,
}

impl TransactionGuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guard if it is free. Returns false if it was already held.
    pub fn try_acquire(&mut self, category: GuardCategory) -> bool {
        let flag = self.held.entry(category).or_insert(false);
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    /// Clear the guard. Returns whether it had been held.
    pub fn release(&mut self, category: GuardCategory) -> bool {
        match self.held.get_mut(&category) {
            Some(flag) => std::mem::replace(flag, false),
            None => false,
        }
    }

    pub fn is_held(&self, category: GuardCategory) -> bool {
        self.held.get(&category).copied().unwrap_or(false)
    }

    pub fn held_categories(&self) -> Vec<GuardCategory> {
        GuardCategory::ALL
            .into_iter()
            .filter(|c| self.is_held(*c))
            .collect()
    }
}

/// Transaction state for one user: kill switch, guards, and product queue.
pub struct UserTransactionState {
    pub can_transact: bool,
    pub guards: TransactionGuardSet,
    pub(crate) queue: VecDeque<QueuedInvocation>,
}

impl UserTransactionState {
    pub fn new() -> Self {
        Self {
            can_transact: true,
            guards: TransactionGuardSet::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for UserTransactionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UserTransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserTransactionState")
            .field("can_transact", &self.can_transact)
            .field("guards", &self.guards)
            .field("queue_len", &self.queue.len())
            .finish()
    }
}

pub type SharedUserState = Arc<Mutex<UserTransactionState>>;

/// Lock a user's state, recovering from poisoning.
pub(crate) fn lock_state(state: &SharedUserState) -> MutexGuard<'_, UserTransactionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Lazily populated map of per-user transaction state.
#[derive(Default)]
pub struct UserStates {
    users: RwLock<HashMap<UserId, SharedUserState>>,
}

impl UserStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the user's state, creating it on first reference.
    pub fn get_or_create(&self, user: UserId) -> SharedUserState {
        if let Some(state) = self.get(user) {
            return state;
        }
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(UserTransactionState::new())))
            .clone()
    }

    pub fn get(&self, user: UserId) -> Option<SharedUserState> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(&user).cloned()
    }

    /// Drop the user's state. In-flight flows keep their own reference and
    /// finish against the detached copy.
    pub fn discard(&self, user: UserId) -> Option<SharedUserState> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.remove(&user)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let mut guards = TransactionGuardSet::new();
        assert!(!guards.is_held(GuardCategory::Product));

        assert!(guards.try_acquire(GuardCategory::Product));
        assert!(!guards.try_acquire(GuardCategory::Product));
        assert!(guards.is_held(GuardCategory::Product));

        assert!(guards.release(GuardCategory::Product));
        assert!(!guards.release(GuardCategory::Product));
        assert!(guards.try_acquire(GuardCategory::Product));
    }

    #[test]
    fn test_categories_are_independent() {
        let mut guards = TransactionGuardSet::new();
        assert!(guards.try_acquire(GuardCategory::CurrencySubscription));
        assert!(guards.try_acquire(GuardCategory::PremiumSubscription));
        assert!(guards.try_acquire(GuardCategory::Subscription));
        assert_eq!(
            guards.held_categories(),
            vec![
                GuardCategory::Subscription,
                GuardCategory::CurrencySubscription,
                GuardCategory::PremiumSubscription
            ]
        );
    }

    #[test]
    fn test_user_states_lazy_creation_and_discard() {
        let states = UserStates::new();
        assert!(states.get(UserId(1)).is_none());

        let first = states.get_or_create(UserId(1));
        let second = states.get_or_create(UserId(1));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(states.len(), 1);

        lock_state(&first)
            .guards
            .try_acquire(GuardCategory::Entitlement);
        assert!(states.discard(UserId(1)).is_some());
        assert!(states.is_empty());

        let fresh = states.get_or_create(UserId(1));
        assert!(!lock_state(&fresh).guards.is_held(GuardCategory::Entitlement));
    }

    #[test]
    fn test_new_state_can_transact() {
        let state = UserTransactionState::new();
        assert!(state.can_transact);
        assert_eq!(state.queue_len(), 0);
    }
}
