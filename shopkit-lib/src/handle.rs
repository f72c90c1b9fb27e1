//! Single-resolution async handles.
//!
//! Every purchase flow hands its caller an [`AsyncHandle`]. The handle moves
//! from pending to resolved exactly once; later `resolve` calls are ignored, so
//! a provider completion and a timeout may race safely.

use crate::flows::{CALLBACK_FAULT, TRANSACTIONS_DISABLED};
use crate::{ShopkitError, ShopkitErrorCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Error detail of a flow that timed out.
pub const TIMED_OUT: &str = "Timed out";

/// Error detail of an invocation rejected by a held guard.
pub const ALREADY_IN_PROGRESS: &str = "already in progress";

/// Terminal outcome of a handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl HandleOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }

    pub fn timed_out() -> Self {
        Self::failed(TIMED_OUT)
    }

    pub fn already_in_progress() -> Self {
        Self::failed(ALREADY_IN_PROGRESS)
    }

    /// The outcome a flow reports for a rejection or failure.
    ///
    /// Kill switch, guard contention, timeout and callback faults map onto
    /// their fixed reason strings; anything else carries the error message.
    pub fn from_error(error: &ShopkitError) -> Self {
        match error {
            ShopkitError::AlreadyInProgress { .. } => Self::already_in_progress(),
            ShopkitError::Timeout { .. } => Self::timed_out(),
            ShopkitError::TransactionsDisabled => Self::failed(TRANSACTIONS_DISABLED),
            ShopkitError::CallbackFault(_) => Self::failed(CALLBACK_FAULT),
            other => Self::failed(other.to_string()),
        }
    }

    /// Error code of a failed outcome, when its reason has one.
    pub fn error_code(&self) -> Option<ShopkitErrorCode> {
        if self.success {
            return None;
        }
        match self.error.as_deref()? {
            TIMED_OUT => Some(ShopkitErrorCode::Timeout),
            ALREADY_IN_PROGRESS => Some(ShopkitErrorCode::AlreadyInProgress),
            TRANSACTIONS_DISABLED => Some(ShopkitErrorCode::TransactionsDisabled),
            CALLBACK_FAULT => Some(ShopkitErrorCode::CallbackFault),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMED_OUT)
    }

    pub fn is_already_in_progress(&self) -> bool {
        self.error.as_deref() == Some(ALREADY_IN_PROGRESS)
    }
}

/// Cloneable, single-resolution result carrier.
///
/// Clones share state: resolving any clone resolves them all.
#[derive(Clone, Debug)]
pub struct AsyncHandle {
    state: Arc<watch::Sender<Option<HandleOutcome>>>,
}

impl AsyncHandle {
    /// Create a pending handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Create a handle that is already resolved.
    pub fn resolved(outcome: HandleOutcome) -> Self {
        let (tx, _rx) = watch::channel(Some(outcome));
        Self {
            state: Arc::new(tx),
        }
    }

    /// Resolve the handle. Only the first call has an effect.
    ///
    /// Returns `true` if this call performed the resolution.
    pub fn resolve(&self, success: bool, error: Option<String>) -> bool {
        self.resolve_with(HandleOutcome { success, error })
    }

    /// Resolve with a prepared outcome. Only the first call has an effect.
    pub fn resolve_with(&self, outcome: HandleOutcome) -> bool {
        let mut pending = Some(outcome);
        self.state.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        })
    }

    /// Whether the handle has been resolved.
    pub fn is_completed(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Non-blocking peek at the outcome.
    pub fn outcome(&self) -> Option<HandleOutcome> {
        self.state.borrow().clone()
    }

    /// Suspend until the handle resolves.
    pub async fn wait(&self) -> HandleOutcome {
        let mut rx = self.state.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            // The sender lives as long as `self`, so this is unreachable in practice.
            Err(_) => Some(HandleOutcome::failed("handle dropped")),
        };
        outcome.unwrap_or_else(|| HandleOutcome::failed("unresolved"))
    }

    /// Suspend until the handle resolves or `timeout` elapses.
    ///
    /// On timeout the handle itself is resolved with `(false, "Timed out")`,
    /// unless an organic resolution won the race first.
    pub async fn wait_timeout(&self, timeout: Duration) -> HandleOutcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.resolve_with(HandleOutcome::timed_out());
                self.outcome().unwrap_or_else(HandleOutcome::timed_out)
            }
        }
    }
}

impl Default for AsyncHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What an invocation produced: a handle to await, or a value known up front.
#[derive(Clone, Debug)]
pub enum FlowResult {
    Pending(AsyncHandle),
    Immediate(HandleOutcome),
}

impl FlowResult {
    /// Wait for the final outcome.
    pub async fn settle(self) -> HandleOutcome {
        match self {
            Self::Pending(handle) => handle.wait().await,
            Self::Immediate(outcome) => outcome,
        }
    }
}

impl From<AsyncHandle> for FlowResult {
    fn from(handle: AsyncHandle) -> Self {
        Self::Pending(handle)
    }
}

impl From<HandleOutcome> for FlowResult {
    fn from(outcome: HandleOutcome) -> Self {
        Self::Immediate(outcome)
    }
}
