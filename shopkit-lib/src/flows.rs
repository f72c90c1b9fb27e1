//! Purchase flow state machine.
//!
//! Products, entitlements, generic subscriptions and the two subscription
//! variants all run the same sequence:
//!
//! ```text
//! Idle -> GuardAcquired -> AwaitingProviderEvent -> Resolved -> GuardReleased
//! ```
//!
//! The flows differ only in guard category and prompt kind. A flow is started
//! synchronously (guard check-then-set happens before the caller gets its
//! handle) and finishes on a spawned task that races the provider completion
//! against the configured timeout. The guard is always released before the
//! handle resolves, so a caller reacting to the outcome can start the next
//! purchase straight away.

use crate::events::{PurchaseCompleted, PurchaseFailed};
use crate::guards::{lock_state, SharedUserState};
use crate::handle::TIMED_OUT;
use crate::provider::CompletionWaiter;
use crate::queue;
use crate::storefront::Context;
use crate::{
    AsyncHandle, EntitlementId, FlowResult, GuardCategory, HandleOutcome, ProductId, PromptKind,
    PurchaseTarget, ShopkitError, UserId,
};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Error detail of an invocation refused by the kill switch.
pub const TRANSACTIONS_DISABLED: &str = "transactions disabled";

/// Error detail and failure reason of a declined prompt.
pub const CANCELLED: &str = "cancelled";

/// Error detail and failure reason of a failing user callback.
pub const CALLBACK_FAULT: &str = "callback fault";

/// Error detail of an entitlement flow for an entitlement the user owns.
pub const ALREADY_OWNED: &str = "already owned";

/// Grants the purchased item. The returned flag is logged, never acted on.
pub type FulfillCallback = Arc<dyn Fn(UserId) -> anyhow::Result<bool> + Send + Sync>;

/// Told `(user, purchased, error)` once the provider reports back.
pub type NotifyCallback =
    Arc<dyn Fn(UserId, bool, Option<&str>) -> anyhow::Result<()> + Send + Sync>;

/// User callbacks attached to a registered purchase.
#[derive(Clone, Default)]
pub struct PurchaseCallbacks {
    pub fulfill: Option<FulfillCallback>,
    pub notify: Option<NotifyCallback>,
}

impl PurchaseCallbacks {
    /// No callbacks; the flow only prompts and reports.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_fulfill<F>(mut self, fulfill: F) -> Self
    where
        F: Fn(UserId) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.fulfill = Some(Arc::new(fulfill));
        self
    }

    pub fn on_notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(UserId, bool, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.notify = Some(Arc::new(notify));
        self
    }
}

impl std::fmt::Debug for PurchaseCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseCallbacks")
            .field("fulfill", &self.fulfill.is_some())
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

/// The two named subscription variants. Each has its own guard, so one of
/// each may be in flight for the same user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionVariant {
    /// Paid in the platform currency.
    Currency,
    /// Tied to the premium membership.
    Premium,
}

impl SubscriptionVariant {
    pub fn category(&self) -> GuardCategory {
        match self {
            Self::Currency => GuardCategory::CurrencySubscription,
            Self::Premium => GuardCategory::PremiumSubscription,
        }
    }
}

/// A registered flow's parameters.
#[derive(Debug)]
pub(crate) struct FlowDefinition {
    pub(crate) name: String,
    pub(crate) category: GuardCategory,
    pub(crate) kind: PromptKind,
    pub(crate) target: PurchaseTarget,
    pub(crate) callbacks: PurchaseCallbacks,
}

/// Start a flow under its category guard.
///
/// Returns an already resolved handle when transacting is disabled or the
/// guard is held; in both cases nothing is prompted and the guard is left
/// untouched. Must be called from within a Tokio runtime.
pub(crate) fn invoke_guarded(
    ctx: &Arc<Context>,
    flow: &Arc<FlowDefinition>,
    user: UserId,
) -> AsyncHandle {
    let state = ctx.users.get_or_create(user);
    {
        let mut state = lock_state(&state);
        if !state.can_transact || !ctx.transactions_enabled() {
            let err = ShopkitError::TransactionsDisabled;
            tracing::info!(%user, purchase = %flow.name, error = %err, "refusing purchase");
            return AsyncHandle::resolved(HandleOutcome::from_error(&err));
        }
        if !state.guards.try_acquire(flow.category) {
            let err = ShopkitError::AlreadyInProgress {
                category: flow.category.to_string(),
            };
            tracing::debug!(%user, purchase = %flow.name, error = %err, "refusing purchase");
            return AsyncHandle::resolved(HandleOutcome::from_error(&err));
        }
    }
    tracing::debug!(%user, purchase = %flow.name, category = %flow.category, "guard acquired");
    spawn_flow(ctx, flow, user, Some(state))
}

/// Start a flow without touching any guard.
///
/// Used by the purchase queue, which holds the product guard itself for the
/// whole queued invocation.
pub(crate) fn start_unguarded(
    ctx: &Arc<Context>,
    flow: &Arc<FlowDefinition>,
    user: UserId,
) -> FlowResult {
    if !ctx.can_transact(user) {
        let err = ShopkitError::TransactionsDisabled;
        tracing::info!(%user, purchase = %flow.name, error = %err, "dropping queued purchase");
        return FlowResult::Immediate(HandleOutcome::from_error(&err));
    }
    FlowResult::Pending(spawn_flow(ctx, flow, user, None))
}

fn spawn_flow(
    ctx: &Arc<Context>,
    flow: &Arc<FlowDefinition>,
    user: UserId,
    guard: Option<SharedUserState>,
) -> AsyncHandle {
    // Subscribed before the prompt so an immediate completion is not lost.
    let waiter = ctx.completions.subscribe(user, flow.target);
    let handle = AsyncHandle::new();

    let resolver = handle.clone();
    let ctx = ctx.clone();
    let flow = flow.clone();
    tokio::spawn(async move {
        let outcome = run_flow(&ctx, &flow, user, waiter).await;
        let Some(state) = guard else {
            resolver.resolve_with(outcome);
            return;
        };
        lock_state(&state).guards.release(flow.category);
        tracing::debug!(
            %user,
            purchase = %flow.name,
            category = %flow.category,
            "guard released"
        );
        resolver.resolve_with(outcome);
        // A queued purchase may be waiting on the guard this flow held.
        if flow.category == GuardCategory::Product {
            queue::drain(&ctx, user, state);
        }
    });

    handle
}

async fn run_flow(
    ctx: &Context,
    flow: &FlowDefinition,
    user: UserId,
    mut waiter: CompletionWaiter,
) -> HandleOutcome {
    match flow.kind {
        PromptKind::Product => {
            let product = ProductId(flow.target.raw_id());
            tracing::info!(%user, purchase = %flow.name, %product, "prompting product purchase");
            ctx.provider.prompt_product_purchase(user, product);
        }
        PromptKind::Entitlement => {
            let entitlement = EntitlementId(flow.target.raw_id());
            if ctx.provider.user_owns_entitlement(user, entitlement).await {
                tracing::info!(%user, purchase = %flow.name, %entitlement, "entitlement already owned");
                return HandleOutcome::failed(ALREADY_OWNED);
            }
            tracing::info!(%user, purchase = %flow.name, %entitlement, "prompting entitlement purchase");
            ctx.provider.prompt_entitlement_purchase(user, entitlement);
        }
    }

    let timeout = ctx.config.purchase_timeout();
    let purchased = match tokio::time::timeout(timeout, waiter.next_match()).await {
        Ok(Some(purchased)) => purchased,
        Ok(None) => {
            tracing::error!(%user, purchase = %flow.name, "completion hub closed");
            return fail(ctx, flow, user, "completion hub closed");
        }
        Err(_) => {
            let err = ShopkitError::Timeout {
                operation: format!("purchase {}", flow.name),
                timeout_ms: timeout.as_millis() as u64,
            };
            tracing::warn!(%user, error = %err, "purchase timed out");
            return fail(ctx, flow, user, TIMED_OUT);
        }
    };
    drop(waiter);
    tracing::debug!(%user, purchase = %flow.name, purchased, "provider completion matched");

    if let Err(e) = settle_callbacks(flow, user, purchased) {
        tracing::error!(%user, purchase = %flow.name, error = %e, "purchase callback failed");
        return fail(ctx, flow, user, CALLBACK_FAULT);
    }

    if !purchased {
        return fail(ctx, flow, user, CANCELLED);
    }

    tracing::info!(%user, purchase = %flow.name, target = %flow.target, "purchase completed");
    ctx.events.purchase_completed.fire(&PurchaseCompleted {
        user,
        target: flow.target,
        purchase_name: flow.name.clone(),
    });
    HandleOutcome::succeeded()
}

fn settle_callbacks(flow: &FlowDefinition, user: UserId, purchased: bool) -> crate::Result<()> {
    if let Some(notify) = &flow.callbacks.notify {
        let error = (!purchased).then_some(CANCELLED);
        run_callback(|| notify(user, purchased, error))?;
    }
    if purchased {
        if let Some(fulfill) = &flow.callbacks.fulfill {
            let granted = run_callback(|| fulfill(user))?;
            if !granted {
                tracing::debug!(%user, purchase = %flow.name, "fulfillment reported nothing granted");
            }
        }
    }
    Ok(())
}

fn fail(ctx: &Context, flow: &FlowDefinition, user: UserId, reason: &str) -> HandleOutcome {
    ctx.events.purchase_failed.fire(&PurchaseFailed {
        user,
        target: flow.target,
        purchase_name: flow.name.clone(),
        reason: reason.to_string(),
    });
    HandleOutcome::failed(reason)
}

/// Run a user callback, turning an `Err` or a panic into a `CallbackFault`.
pub(crate) fn run_callback<T>(callback: impl FnOnce() -> anyhow::Result<T>) -> crate::Result<T> {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ShopkitError::CallbackFault(format!("{:#}", e))),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string());
            Err(ShopkitError::CallbackFault(message))
        }
    }
}
