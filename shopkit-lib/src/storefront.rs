//! The storefront engine.
//!
//! [`Storefront`] is a cheap, cloneable handle over the shared engine state.
//! Registration methods are meant to be called at startup, before any user
//! joins; everything else may be called concurrently from any task.

use crate::currency::Ledger;
use crate::flows::{self, FlowDefinition};
use crate::guards::{lock_state, UserStates};
use crate::provider::{CompletionHub, PromptCompletion};
use crate::queue::{self, Invocation};
use crate::receipts::{self, InFlightReceipts};
use crate::registry::{PurchaseRegistry, ReceiptCallbackRegistry, ReceiptGrant};
use crate::session::{self, Sessions};
use crate::{
    AsyncHandle, CurrencyDefinition, CurrencyRegistry, EntitlementId, EventBus, FlowResult,
    GuardCategory, HandleOutcome, PaymentProvider, ProductId, ProfileStore, PromptKind,
    PurchaseCallbacks, PurchaseFn, PurchaseTarget, ReceiptDecision, ReceiptInfo, Result,
    SessionHost, ShopkitConfig, SubscriptionVariant, UserId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Error detail of an invocation of a name nothing was registered under.
pub const UNKNOWN_PURCHASE: &str = "unknown purchase";

/// Error detail of a flow invoked after the storefront was dropped.
pub const STOREFRONT_CLOSED: &str = "storefront closed";

/// Error detail of a queued purchase that is not a product purchase.
pub const NOT_QUEUEABLE: &str = "not a product purchase";

/// Shared engine state.
pub(crate) struct Context {
    pub(crate) config: ShopkitConfig,
    pub(crate) provider: Arc<dyn PaymentProvider>,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) host: Arc<dyn SessionHost>,
    pub(crate) currencies: CurrencyRegistry,
    pub(crate) purchases: PurchaseRegistry,
    pub(crate) receipt_callbacks: ReceiptCallbackRegistry,
    pub(crate) in_flight_receipts: InFlightReceipts,
    pub(crate) events: EventBus,
    pub(crate) sessions: Sessions,
    pub(crate) users: UserStates,
    pub(crate) completions: CompletionHub,
    can_transact: AtomicBool,
}

impl Context {
    pub(crate) fn ledger(&self) -> Ledger<'_> {
        Ledger::new(&self.currencies, &self.sessions, &self.events)
    }

    /// The process-wide kill switch.
    pub(crate) fn transactions_enabled(&self) -> bool {
        self.can_transact.load(Ordering::SeqCst)
    }

    /// Kill switch and the user's own flag.
    pub(crate) fn can_transact(&self, user: UserId) -> bool {
        self.transactions_enabled()
            && self
                .users
                .get(user)
                .map_or(true, |state| lock_state(&state).can_transact)
    }

    /// Drop the user's transaction state and fail anything still queued.
    pub(crate) fn discard_user(&self, user: UserId) {
        if let Some(state) = self.users.discard(user) {
            let dropped = queue::abandon(&state);
            if dropped > 0 {
                tracing::info!(%user, dropped, "dropped queued purchases");
            }
        }
    }
}

/// Monetization engine: currencies, purchase flows, receipts and sessions.
#[derive(Clone)]
pub struct Storefront {
    ctx: Arc<Context>,
}

impl Storefront {
    pub fn new(
        config: ShopkitConfig,
        provider: Arc<dyn PaymentProvider>,
        profiles: Arc<dyn ProfileStore>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        let completions = CompletionHub::new(config.completion_channel_capacity);
        Self {
            ctx: Arc::new(Context {
                config,
                provider,
                profiles,
                host,
                currencies: CurrencyRegistry::new(),
                purchases: PurchaseRegistry::new(),
                receipt_callbacks: ReceiptCallbackRegistry::new(),
                in_flight_receipts: InFlightReceipts::new(),
                events: EventBus::new(),
                sessions: Sessions::new(),
                users: UserStates::new(),
                completions,
                can_transact: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> &ShopkitConfig {
        &self.ctx.config
    }

    /// The five storefront signals.
    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn currencies(&self) -> &CurrencyRegistry {
        &self.ctx.currencies
    }

    // Registration

    /// Register a currency and its price points.
    ///
    /// Each price point becomes a product purchase named `"{id}:{amount}"`
    /// and a receipt binding that credits the amount. Currency is only ever
    /// credited from the receipt and only the interactive prompt fires
    /// `PurchaseCompleted`.
    ///
    /// Returns false if the id was already registered.
    pub fn register_currency(&self, definition: CurrencyDefinition) -> Result<bool> {
        definition.validate()?;
        if !self.ctx.currencies.register(definition.clone()) {
            return Ok(false);
        }

        for (&amount, &product) in &definition.price_points {
            let name = definition.pack_purchase_name(amount);
            self.register_flow(
                name.clone(),
                GuardCategory::Product,
                PromptKind::Product,
                product.into(),
                PurchaseCallbacks::none(),
            );

            let grant = ReceiptGrant::Currency {
                currency: definition.id.clone(),
                amount,
            };
            self.ctx.receipt_callbacks.bind(product, name, grant);
        }
        Ok(true)
    }

    /// Register a one-off developer product.
    pub fn register_product(
        &self,
        name: impl Into<String>,
        product: ProductId,
        callbacks: PurchaseCallbacks,
    ) -> PurchaseFn {
        self.register_flow(
            name.into(),
            GuardCategory::Product,
            PromptKind::Product,
            product.into(),
            callbacks,
        )
    }

    /// Register a permanent entitlement (game pass).
    pub fn register_entitlement(
        &self,
        name: impl Into<String>,
        entitlement: EntitlementId,
        callbacks: PurchaseCallbacks,
    ) -> PurchaseFn {
        self.register_flow(
            name.into(),
            GuardCategory::Entitlement,
            PromptKind::Entitlement,
            entitlement.into(),
            callbacks,
        )
    }

    /// Register a generic subscription.
    pub fn register_subscription(
        &self,
        name: impl Into<String>,
        product: ProductId,
        callbacks: PurchaseCallbacks,
    ) -> PurchaseFn {
        self.register_flow(
            name.into(),
            GuardCategory::Subscription,
            PromptKind::Product,
            product.into(),
            callbacks,
        )
    }

    /// Register one of the named subscription variants.
    pub fn register_subscription_variant(
        &self,
        variant: SubscriptionVariant,
        name: impl Into<String>,
        product: ProductId,
        callbacks: PurchaseCallbacks,
    ) -> PurchaseFn {
        self.register_flow(
            name.into(),
            variant.category(),
            PromptKind::Product,
            product.into(),
            callbacks,
        )
    }

    fn register_flow(
        &self,
        name: String,
        category: GuardCategory,
        kind: PromptKind,
        target: PurchaseTarget,
        callbacks: PurchaseCallbacks,
    ) -> PurchaseFn {
        let flow = Arc::new(FlowDefinition {
            name,
            category,
            kind,
            target,
            callbacks,
        });
        let weak: Weak<Context> = Arc::downgrade(&self.ctx);
        let invoked = flow.clone();
        let invoke: PurchaseFn = Arc::new(move |user: UserId| match weak.upgrade() {
            Some(ctx) => flows::invoke_guarded(&ctx, &invoked, user),
            None => AsyncHandle::resolved(HandleOutcome::failed(STOREFRONT_CLOSED)),
        });
        self.ctx.purchases.register(flow, invoke)
    }

    /// Bind a receipt fulfilment callback to a product.
    ///
    /// Returns false (keeping the original) if the product is already bound.
    pub fn bind_product_callback<F>(
        &self,
        product: ProductId,
        purchase_name: impl Into<String>,
        callback: F,
    ) -> bool
    where
        F: Fn(&ReceiptInfo) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let grant = ReceiptGrant::Callback(Arc::new(callback));
        self.ctx.receipt_callbacks.bind(product, purchase_name, grant)
    }

    /// Whether receipts for the product have a fulfilment callback.
    pub fn is_receipt_bound(&self, product: ProductId) -> bool {
        self.ctx.receipt_callbacks.get(product).is_some()
    }

    /// Registered purchase names, sorted.
    pub fn purchase_names(&self) -> Vec<String> {
        self.ctx.purchases.names()
    }

    // Purchases

    /// Start a registered purchase for a user.
    pub fn purchase(&self, name: &str, user: UserId) -> AsyncHandle {
        match self.ctx.purchases.get(name) {
            Some(registered) => (registered.invoke)(user),
            None => {
                tracing::warn!(%user, purchase = name, "unknown purchase");
                AsyncHandle::resolved(HandleOutcome::failed(UNKNOWN_PURCHASE))
            }
        }
    }

    /// Queue an arbitrary invocation behind the user's product guard.
    pub fn enqueue<F>(&self, user: UserId, invocation: F, high_priority: bool) -> AsyncHandle
    where
        F: FnOnce(UserId) -> FlowResult + Send + 'static,
    {
        queue::enqueue(&self.ctx, user, Box::new(invocation), high_priority)
    }

    /// Queue a registered product purchase.
    pub fn enqueue_product(&self, user: UserId, name: &str, high_priority: bool) -> AsyncHandle {
        let Some(registered) = self.ctx.purchases.get(name) else {
            tracing::warn!(%user, purchase = name, "unknown purchase");
            return AsyncHandle::resolved(HandleOutcome::failed(UNKNOWN_PURCHASE));
        };
        if registered.flow.category != GuardCategory::Product {
            tracing::warn!(
                %user,
                purchase = name,
                category = %registered.flow.category,
                "only product purchases can be queued"
            );
            return AsyncHandle::resolved(HandleOutcome::failed(NOT_QUEUEABLE));
        }

        let weak = Arc::downgrade(&self.ctx);
        let flow = registered.flow;
        let invocation: Invocation = Box::new(move |user| match weak.upgrade() {
            Some(ctx) => flows::start_unguarded(&ctx, &flow, user),
            None => FlowResult::Immediate(HandleOutcome::failed(STOREFRONT_CLOSED)),
        });
        queue::enqueue(&self.ctx, user, invocation, high_priority)
    }

    /// Invocations waiting in the user's queue (not counting a running one).
    pub fn queue_len(&self, user: UserId) -> usize {
        self.ctx
            .users
            .get(user)
            .map_or(0, |state| lock_state(&state).queue_len())
    }

    /// Whether a flow of the category is in flight for the user.
    pub fn is_guard_held(&self, user: UserId, category: GuardCategory) -> bool {
        self.ctx
            .users
            .get(user)
            .is_some_and(|state| lock_state(&state).guards.is_held(category))
    }

    // Provider events

    /// The provider reports a product prompt finished.
    ///
    /// Returns the number of flows that observed the report.
    pub fn product_purchase_finished(
        &self,
        user: UserId,
        product: ProductId,
        purchased: bool,
    ) -> usize {
        tracing::debug!(%user, %product, purchased, "product prompt finished");
        self.ctx.completions.publish(PromptCompletion {
            user,
            target: PurchaseTarget::Product(product),
            purchased,
        })
    }

    /// The provider reports an entitlement prompt finished.
    pub fn entitlement_purchase_finished(
        &self,
        user: UserId,
        entitlement: EntitlementId,
        purchased: bool,
    ) -> usize {
        tracing::debug!(%user, %entitlement, purchased, "entitlement prompt finished");
        self.ctx.completions.publish(PromptCompletion {
            user,
            target: PurchaseTarget::Entitlement(entitlement),
            purchased,
        })
    }

    /// Decide a receipt delivered by the provider.
    pub async fn process_receipt(&self, receipt: ReceiptInfo) -> ReceiptDecision {
        receipts::process_receipt(&self.ctx, &receipt).await
    }

    // Sessions

    /// Load the user's profile and open their session.
    pub async fn player_joined(&self, user: UserId) -> Result<()> {
        session::join(&self.ctx, user).await
    }

    /// Persist and release the user's profile and drop their state.
    pub async fn player_left(&self, user: UserId) -> Result<()> {
        session::leave(&self.ctx, user).await
    }

    /// Persist the user's profile without ending the session.
    pub async fn save_profile(&self, user: UserId) -> Result<()> {
        session::save(&self.ctx, user).await
    }

    pub fn has_session(&self, user: UserId) -> bool {
        self.ctx.sessions.contains(user)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.ctx.sessions.len()
    }

    // Ledger

    pub fn ledger(&self) -> Ledger<'_> {
        self.ctx.ledger()
    }

    pub fn balance(&self, user: UserId, currency: &str) -> i64 {
        self.ledger().balance(user, currency)
    }

    pub fn balances(&self, user: UserId) -> BTreeMap<String, i64> {
        self.ledger().balances(user)
    }

    pub fn add_currency(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        self.ledger().add(user, currency, amount)
    }

    pub fn deduct_currency(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        self.ledger().deduct(user, currency, amount)
    }

    pub fn set_currency(&self, user: UserId, currency: &str, amount: i64) -> Result<i64> {
        self.ledger().set(user, currency, amount)
    }

    // Kill switches

    /// Freeze or unfreeze all transacting.
    pub fn set_can_transact(&self, enabled: bool) {
        tracing::warn!(enabled, "global transact switch changed");
        self.ctx.can_transact.store(enabled, Ordering::SeqCst);
    }

    pub fn can_transact(&self) -> bool {
        self.ctx.transactions_enabled()
    }

    /// Freeze or unfreeze one user's transacting.
    pub fn set_user_can_transact(&self, user: UserId, enabled: bool) {
        tracing::info!(%user, enabled, "user transact switch changed");
        let state = self.ctx.users.get_or_create(user);
        lock_state(&state).can_transact = enabled;
    }

    pub fn user_can_transact(&self, user: UserId) -> bool {
        self.ctx.can_transact(user)
    }
}
