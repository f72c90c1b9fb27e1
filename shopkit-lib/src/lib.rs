//! Shopkit library.
//!
//! Orchestrates in-experience monetization for a persistent multi-user
//! application: virtual currency ledgers, interactive purchase flows against an
//! external payment provider, exactly-once receipt acknowledgment, and the
//! per-user profile sessions that back all of it.
//!
//! # Features
//!
//! - **Currency Ledger**: per-user balances with checked add/deduct and change events
//! - **Purchase Flows**: one-off products, entitlements and subscriptions sharing one
//!   guarded prompt/await/resolve state machine
//! - **Purchase Queue**: per-user FIFO serialisation of product prompts
//! - **Receipts**: idempotent receipt processing persisted in the user's profile
//! - **Sessions**: exclusive profile leases acquired on join and released on leave
//!
//! # Example
//!
//! ```ignore
//! use shopkit_lib::{CurrencyDefinition, ShopkitConfig, Storefront, UserId, ProductId};
//!
//! let storefront = Storefront::new(ShopkitConfig::default(), provider, profiles, host);
//! storefront.register_currency(
//!     CurrencyDefinition::new("Gems", "Gems", "G").with_price_point(100, ProductId(555)),
//! )?;
//!
//! storefront.player_joined(UserId(1)).await?;
//! let handle = storefront.purchase("Gems:100", UserId(1));
//! let outcome = handle.wait().await;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod currency;
pub mod errors;
pub mod events;
pub mod flows;
pub mod guards;
pub mod handle;
pub mod profile;
pub mod provider;
pub mod queue;
pub mod receipts;
pub mod registry;
pub mod session;
pub mod simulated;
mod storefront;

pub use config::ShopkitConfig;
pub use currency::{AbbreviationPlacement, CurrencyDefinition, CurrencyRegistry};
pub use errors::{ShopkitError, ShopkitErrorCode};
pub use events::{
    CurrencyAdded, CurrencyDeducted, EventBus, ProfileLoaded, PurchaseCompleted, PurchaseFailed,
    Signal,
};
pub use flows::{FulfillCallback, NotifyCallback, PurchaseCallbacks, SubscriptionVariant};
pub use guards::{GuardCategory, TransactionGuardSet, UserTransactionState};
pub use handle::{AsyncHandle, FlowResult, HandleOutcome};
pub use profile::{
    FileProfileStore, MemoryProfileStore, ProfileDocument, ProfileLease, ProfileStore,
};
pub use provider::{PaymentProvider, PromptKind, ReceiptDecision, ReceiptInfo};
pub use registry::{PurchaseFn, ReceiptCallback};
pub use session::SessionHost;
pub use storefront::Storefront;

/// Common result alias for Shopkit operations.
pub type Result<T> = std::result::Result<T, ShopkitError>;

/// Identity of a connected user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    /// Key of the user's persisted profile document.
    ///
    /// ```
    /// use shopkit_lib::UserId;
    ///
    /// assert_eq!(UserId(42).profile_key("Player_"), "Player_42");
    /// ```
    pub fn profile_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider identifier of a one-shot developer product (or subscription product).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider identifier of a permanent, repeatable-prompt entitlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitlementId(pub u64);

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a purchase flow prompts for; carried by purchase events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PurchaseTarget {
    Product(ProductId),
    Entitlement(EntitlementId),
}

impl PurchaseTarget {
    /// Raw provider identifier, regardless of kind.
    pub fn raw_id(&self) -> u64 {
        match self {
            Self::Product(id) => id.0,
            Self::Entitlement(id) => id.0,
        }
    }
}

impl From<ProductId> for PurchaseTarget {
    fn from(id: ProductId) -> Self {
        Self::Product(id)
    }
}

impl From<EntitlementId> for PurchaseTarget {
    fn from(id: EntitlementId) -> Self {
        Self::Entitlement(id)
    }
}

impl fmt::Display for PurchaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Product(id) => write!(f, "product:{}", id),
            Self::Entitlement(id) => write!(f, "entitlement:{}", id),
        }
    }
}
