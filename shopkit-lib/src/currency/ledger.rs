//! Per-user currency balances.
//!
//! Balances live in the in-memory profile document of the user's session.
//! Each operation does its check-then-mutate under the session lock and fires
//! events only after the lock is released, so listeners may call back into
//! the ledger. A session closed by a leave refuses every mutation.

use super::CurrencyRegistry;
use crate::events::{CurrencyAdded, CurrencyDeducted, EventBus};
use crate::session::{lock_session, Sessions};
use crate::{ReceiptInfo, Result, ShopkitError, UserId};
use std::collections::BTreeMap;

/// Borrowed view over balances, currency definitions and events.
pub struct Ledger<'a> {
    currencies: &'a CurrencyRegistry,
    sessions: &'a Sessions,
    events: &'a EventBus,
}

impl<'a> Ledger<'a> {
    pub fn new(
        currencies: &'a CurrencyRegistry,
        sessions: &'a Sessions,
        events: &'a EventBus,
    ) -> Self {
        Self {
            currencies,
            sessions,
            events,
        }
    }

    /// Current balance. Never fails.
    ///
    /// Falls back to the currency's default when the user has no session or
    /// the field is missing, and to zero for unregistered currencies.
    pub fn balance(&self, user: UserId, currency: &str) -> i64 {
        let Some(definition) = self.currencies.get(currency) else {
            return 0;
        };
        match self.sessions.get(user) {
            Some(session) => lock_session(&session)
                .document
                .currencies
                .get(currency)
                .copied()
                .unwrap_or(definition.default_value),
            None => definition.default_value,
        }
    }

    /// Balances of every registered currency.
    pub fn balances(&self, user: UserId) -> BTreeMap<String, i64> {
        self.currencies
            .ids()
            .into_iter()
            .map(|id| {
                let balance = self.balance(user, &id);
                (id, balance)
            })
            .collect()
    }

    /// Unchecked add. Negative amounts decrease the balance without a funds
    /// check. Always fires `CurrencyAdded` with the literal amount.
    ///
    /// Returns the new balance.
    pub fn add(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        let definition = self.currencies.get_required(currency)?;
        let session = self.sessions.get(user).ok_or(ShopkitError::NoSession(user))?;

        let new_balance = {
            let mut session = lock_session(&session);
            if session.closed {
                return Err(ShopkitError::NoSession(user));
            }
            let balance = session
                .document
                .currencies
                .entry(definition.id.clone())
                .or_insert(definition.default_value);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| ShopkitError::invalid_input("amount", "balance would overflow"))?;
            *balance
        };

        tracing::debug!(%user, currency, amount, new_balance, "currency added");
        self.events.currency_added.fire(&CurrencyAdded {
            user,
            currency: definition.id.clone(),
            amount,
        });
        Ok(new_balance)
    }

    /// Checked deduct. Fails without mutating or firing if the amount is not
    /// positive or exceeds the balance.
    ///
    /// Returns the new balance.
    pub fn deduct(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(ShopkitError::invalid_input("amount", "must be positive"));
        }
        let definition = self.currencies.get_required(currency)?;
        let session = self.sessions.get(user).ok_or(ShopkitError::NoSession(user))?;

        let new_balance = {
            let mut session = lock_session(&session);
            if session.closed {
                return Err(ShopkitError::NoSession(user));
            }
            let balance = session
                .document
                .currencies
                .entry(definition.id.clone())
                .or_insert(definition.default_value);
            if *balance < amount {
                return Err(ShopkitError::InsufficientFunds {
                    currency: definition.id.clone(),
                    required: amount,
                    available: *balance,
                });
            }
            *balance -= amount;
            *balance
        };

        tracing::debug!(%user, currency, amount, new_balance, "currency deducted");
        self.events.currency_deducted.fire(&CurrencyDeducted {
            user,
            currency: definition.id.clone(),
            amount,
        });
        Ok(new_balance)
    }

    /// Overwrite a balance.
    ///
    /// Fires `CurrencyAdded` with the delta only when the balance increases;
    /// decreases are silent. Fails without mutating if the delta overflows.
    pub fn set(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        let definition = self.currencies.get_required(currency)?;
        let session = self.sessions.get(user).ok_or(ShopkitError::NoSession(user))?;

        let delta = {
            let mut session = lock_session(&session);
            if session.closed {
                return Err(ShopkitError::NoSession(user));
            }
            let currencies = &mut session.document.currencies;
            let previous = currencies
                .get(&definition.id)
                .copied()
                .unwrap_or(definition.default_value);
            let delta = amount.checked_sub(previous).ok_or_else(|| {
                ShopkitError::invalid_input("amount", "balance change would overflow")
            })?;
            currencies.insert(definition.id.clone(), amount);
            delta
        };

        tracing::debug!(%user, currency, delta, amount, "currency set");
        if delta > 0 {
            self.events.currency_added.fire(&CurrencyAdded {
                user,
                currency: definition.id.clone(),
                amount: delta,
            });
        }
        Ok(amount)
    }

    /// Credit a paid receipt and record its purchase id under one lock.
    ///
    /// A concurrent leave snapshots either both or neither. A receipt
    /// already in the history is not credited again.
    ///
    /// Returns the new balance.
    pub(crate) fn credit_receipt(
        &self,
        receipt: &ReceiptInfo,
        currency: &str,
        amount: i64,
        history_limit: usize,
    ) -> Result<i64> {
        let user = receipt.user;
        let purchase_id = receipt.purchase_id.as_str();
        let definition = self.currencies.get_required(currency)?;
        let session = self.sessions.get(user).ok_or(ShopkitError::NoSession(user))?;

        let new_balance = {
            let mut session = lock_session(&session);
            if session.closed {
                return Err(ShopkitError::NoSession(user));
            }
            let document = &mut session.document;
            let balance = document
                .currencies
                .get(&definition.id)
                .copied()
                .unwrap_or(definition.default_value);
            if document.has_processed_receipt(purchase_id) {
                return Ok(balance);
            }
            let new_balance = balance
                .checked_add(amount)
                .ok_or_else(|| ShopkitError::invalid_input("amount", "balance would overflow"))?;
            document.currencies.insert(definition.id.clone(), new_balance);
            document.record_processed_receipt(purchase_id, history_limit);
            new_balance
        };

        tracing::debug!(%user, currency, amount, new_balance, purchase_id, "receipt credited");
        self.events.currency_added.fire(&CurrencyAdded {
            user,
            currency: definition.id.clone(),
            amount,
        });
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyDefinition;
    use crate::profile::ProfileDocument;
    use crate::session::Session;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        currencies: CurrencyRegistry,
        sessions: Sessions,
        events: EventBus,
    }

    impl Fixture {
        fn new() -> Self {
            let currencies = CurrencyRegistry::new();
            currencies.register(CurrencyDefinition::new("Gems", "Gems", "G"));
            currencies
                .register(CurrencyDefinition::new("Coins", "Coins", "C").with_default_value(50));
            Self {
                currencies,
                sessions: Sessions::new(),
                events: EventBus::new(),
            }
        }

        fn join(&self, user: UserId) {
            self.sessions.insert(user, Session::detached(ProfileDocument::default()));
        }

        fn ledger(&self) -> Ledger<'_> {
            Ledger::new(&self.currencies, &self.sessions, &self.events)
        }
    }

    #[test]
    fn test_balance_defaults_without_session() {
        let fx = Fixture::new();
        assert_eq!(fx.ledger().balance(UserId(1), "Gems"), 0);
        assert_eq!(fx.ledger().balance(UserId(1), "Coins"), 50);
        assert_eq!(fx.ledger().balance(UserId(1), "Unknown"), 0);
    }

    #[test]
    fn test_add_requires_session_and_currency() {
        let fx = Fixture::new();
        let err = fx.ledger().add(UserId(1), "Gems", 5).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::NoSession);

        fx.join(UserId(1));
        let err = fx.ledger().add(UserId(1), "Unknown", 5).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::NotRegistered);
    }

    #[test]
    fn test_add_emits_literal_amount() {
        let fx = Fixture::new();
        fx.join(UserId(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        fx.events
            .currency_added
            .connect(move |e: &CurrencyAdded| sink.lock().unwrap().push(e.amount));

        assert_eq!(fx.ledger().add(UserId(1), "Coins", 10).unwrap(), 60);
        assert_eq!(fx.ledger().add(UserId(1), "Coins", 0).unwrap(), 60);
        assert_eq!(fx.ledger().add(UserId(1), "Coins", -70).unwrap(), -10);

        assert_eq!(*seen.lock().unwrap(), vec![10, 0, -70]);
    }

    #[test]
    fn test_deduct_checks_funds_atomically() {
        let fx = Fixture::new();
        fx.join(UserId(1));

        let fired = Arc::new(Mutex::new(0));
        let counter = fired.clone();
        fx.events
            .currency_deducted
            .connect(move |_: &CurrencyDeducted| *counter.lock().unwrap() += 1);

        let err = fx.ledger().deduct(UserId(1), "Gems", 1).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::InsufficientFunds);
        assert_eq!(fx.ledger().balance(UserId(1), "Gems"), 0);

        let err = fx.ledger().deduct(UserId(1), "Gems", 0).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::InvalidInput);

        assert_eq!(fx.ledger().deduct(UserId(1), "Coins", 50).unwrap(), 0);
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn test_set_only_emits_on_increase() {
        let fx = Fixture::new();
        fx.join(UserId(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        fx.events
            .currency_added
            .connect(move |e: &CurrencyAdded| sink.lock().unwrap().push(e.amount));

        fx.ledger().set(UserId(1), "Coins", 80).unwrap();
        fx.ledger().set(UserId(1), "Coins", 20).unwrap();
        fx.ledger().set(UserId(1), "Coins", 20).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![30]);
        assert_eq!(fx.ledger().balance(UserId(1), "Coins"), 20);
    }

    #[test]
    fn test_set_rejects_overflowing_change() {
        let fx = Fixture::new();
        fx.join(UserId(1));
        fx.ledger().add(UserId(1), "Gems", -10).unwrap();

        let err = fx.ledger().set(UserId(1), "Gems", i64::MAX).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::InvalidInput);
        assert_eq!(fx.ledger().balance(UserId(1), "Gems"), -10);

        assert_eq!(fx.ledger().set(UserId(1), "Gems", i64::MAX - 10).unwrap(), i64::MAX - 10);
    }

    #[test]
    fn test_credit_receipt_records_purchase_once() {
        let fx = Fixture::new();
        fx.join(UserId(1));
        let receipt = ReceiptInfo::new(UserId(1), crate::ProductId(555), "txn-1");

        assert_eq!(fx.ledger().credit_receipt(&receipt, "Gems", 100, 8).unwrap(), 100);
        assert_eq!(fx.ledger().credit_receipt(&receipt, "Gems", 100, 8).unwrap(), 100);

        let session = fx.sessions.get(UserId(1)).unwrap();
        assert!(lock_session(&session).document.has_processed_receipt("txn-1"));
        assert_eq!(fx.ledger().balance(UserId(1), "Gems"), 100);
    }

    #[test]
    fn test_closed_session_refuses_mutation() {
        let fx = Fixture::new();
        fx.join(UserId(1));
        let session = fx.sessions.get(UserId(1)).unwrap();
        lock_session(&session).closed = true;

        let receipt = ReceiptInfo::new(UserId(1), crate::ProductId(555), "txn-1");
        let err = fx.ledger().credit_receipt(&receipt, "Gems", 100, 8).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::NoSession);
        let err = fx.ledger().add(UserId(1), "Gems", 5).unwrap_err();
        assert_eq!(err.code(), crate::ShopkitErrorCode::NoSession);

        let session = lock_session(&session);
        assert!(session.document.currencies.is_empty());
        assert!(!session.document.has_processed_receipt("txn-1"));
    }

    #[test]
    fn test_balances_snapshot() {
        let fx = Fixture::new();
        fx.join(UserId(1));
        fx.ledger().add(UserId(1), "Gems", 3).unwrap();

        let balances = fx.ledger().balances(UserId(1));
        assert_eq!(balances["Gems"], 3);
        assert_eq!(balances["Coins"], 50);
    }
}
