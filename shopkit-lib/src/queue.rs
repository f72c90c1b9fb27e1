//! Per-user product purchase queue.
//!
//! Queued invocations run one at a time, in FIFO order (a high-priority
//! insertion jumps to the front), each while holding the user's `Product`
//! guard. The guard is what serialises them against each other and against
//! direct product purchases.
//!
//! Each invocation runs on its own Tokio task, so a panicking invocation
//! surfaces as a `JoinError` and cannot leave the guard held.

use crate::flows::CALLBACK_FAULT;
use crate::guards::{lock_state, SharedUserState};
use crate::storefront::Context;
use crate::{AsyncHandle, FlowResult, GuardCategory, HandleOutcome, UserId};
use std::sync::Arc;

/// Error detail of queued invocations dropped because the user left.
pub const SESSION_ENDED: &str = "session ended";

/// A deferred purchase: started once it reaches the front of the queue.
///
/// The invocation runs with the `Product` guard already held, so it must
/// not try to acquire that guard itself.
pub type Invocation = Box<dyn FnOnce(UserId) -> FlowResult + Send>;

pub(crate) struct QueuedInvocation {
    invocation: Invocation,
    handle: AsyncHandle,
}

/// Queue an invocation and try to start it.
///
/// The returned handle resolves with the invocation's outcome once it has
/// run.
pub(crate) fn enqueue(
    ctx: &Arc<Context>,
    user: UserId,
    invocation: Invocation,
    high_priority: bool,
) -> AsyncHandle {
    let handle = AsyncHandle::new();
    let state = ctx.users.get_or_create(user);
    {
        let mut state = lock_state(&state);
        let item = QueuedInvocation {
            invocation,
            handle: handle.clone(),
        };
        if high_priority {
            state.queue.push_front(item);
        } else {
            state.queue.push_back(item);
        }
        tracing::debug!(%user, high_priority, queued = state.queue.len(), "purchase queued");
    }
    drain(ctx, user, state);
    handle
}

/// Start the next queued invocation if the product guard is free.
pub(crate) fn drain(ctx: &Arc<Context>, user: UserId, state: SharedUserState) {
    let next = {
        let mut guarded = lock_state(&state);
        if guarded.guards.is_held(GuardCategory::Product) {
            return;
        }
        let Some(next) = guarded.queue.pop_front() else {
            return;
        };
        guarded.guards.try_acquire(GuardCategory::Product);
        next
    };

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let QueuedInvocation { invocation, handle } = next;
        let run = tokio::spawn(async move { invocation(user).settle().await });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%user, error = %e, "queued purchase aborted");
                HandleOutcome::failed(CALLBACK_FAULT)
            }
        };

        lock_state(&state).guards.release(GuardCategory::Product);
        handle.resolve_with(outcome);
        drain(&ctx, user, state);
    });
}

/// Fail every invocation still waiting in a discarded user's queue.
pub(crate) fn abandon(state: &SharedUserState) -> usize {
    let pending: Vec<QueuedInvocation> = lock_state(state).queue.drain(..).collect();
    for item in &pending {
        item.handle
            .resolve_with(HandleOutcome::failed(SESSION_ENDED));
    }
    pending.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::UserTransactionState;
    use std::sync::Mutex;

    #[test]
    fn test_abandon_fails_waiting_items() {
        let state: SharedUserState = Arc::new(Mutex::new(UserTransactionState::new()));
        let handle = AsyncHandle::new();
        lock_state(&state).queue.push_back(QueuedInvocation {
            invocation: Box::new(|_| FlowResult::Immediate(HandleOutcome::succeeded())),
            handle: handle.clone(),
        });

        assert_eq!(abandon(&state), 1);
        assert_eq!(lock_state(&state).queue_len(), 0);
        assert_eq!(
            handle.outcome().unwrap().error.as_deref(),
            Some(SESSION_ENDED)
        );
    }
}
