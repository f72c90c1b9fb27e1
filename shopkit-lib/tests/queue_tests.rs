//! Per-user purchase queue tests.

mod common;

use common::{settle, Harness};
use shopkit_lib::flows::CALLBACK_FAULT;
use shopkit_lib::queue::SESSION_ENDED;
use shopkit_lib::{
    EntitlementId, FlowResult, GuardCategory, HandleOutcome, ProductId, PurchaseCallbacks,
    PurchaseTarget, UserId,
};
use std::sync::{Arc, Mutex};

const USER: UserId = UserId(1);

fn register_items(h: &Harness) {
    for (name, id) in [("A", 1), ("B", 2), ("C", 3)] {
        h.store
            .register_product(name, ProductId(id), PurchaseCallbacks::none());
    }
}

fn prompted(h: &Harness) -> Vec<PurchaseTarget> {
    h.provider.prompts().iter().map(|p| p.target).collect()
}

#[tokio::test]
async fn test_fifo_one_at_a_time() {
    let h = Harness::new();
    register_items(&h);

    let a = h.store.enqueue_product(USER, "A", false);
    let b = h.store.enqueue_product(USER, "B", false);
    let c = h.store.enqueue_product(USER, "C", false);
    assert_eq!(h.store.queue_len(USER), 2);

    h.provider.wait_for_prompts(1).await;
    settle().await;
    assert_eq!(prompted(&h), vec![PurchaseTarget::Product(ProductId(1))]);

    h.store.product_purchase_finished(USER, ProductId(1), true);
    assert!(a.wait().await.success);
    assert!(!b.is_completed());

    h.provider.wait_for_prompts(2).await;
    settle().await;
    assert_eq!(h.provider.prompt_count(), 2);
    h.store.product_purchase_finished(USER, ProductId(2), false);
    assert!(!b.wait().await.success);

    h.provider.wait_for_prompts(3).await;
    h.store.product_purchase_finished(USER, ProductId(3), true);
    assert!(c.wait().await.success);

    assert_eq!(
        prompted(&h),
        vec![
            PurchaseTarget::Product(ProductId(1)),
            PurchaseTarget::Product(ProductId(2)),
            PurchaseTarget::Product(ProductId(3)),
        ]
    );
    settle().await;
    assert!(!h.store.is_guard_held(USER, GuardCategory::Product));
    assert_eq!(h.store.queue_len(USER), 0);
}

#[tokio::test]
async fn test_high_priority_jumps_the_queue() {
    let h = Harness::new();
    register_items(&h);

    let a = h.store.enqueue_product(USER, "A", false);
    let b = h.store.enqueue_product(USER, "B", false);
    let c = h.store.enqueue_product(USER, "C", true);

    for (issued, (handle, product)) in [(a, 1), (c, 3), (b, 2)].into_iter().enumerate() {
        h.provider.wait_for_prompts(issued + 1).await;
        settle().await;
        assert_eq!(h.provider.prompt_count(), issued + 1);
        h.store
            .product_purchase_finished(USER, ProductId(product), true);
        assert!(handle.wait().await.success);
    }

    assert_eq!(
        prompted(&h),
        vec![
            PurchaseTarget::Product(ProductId(1)),
            PurchaseTarget::Product(ProductId(3)),
            PurchaseTarget::Product(ProductId(2)),
        ]
    );
}

#[tokio::test]
async fn test_queue_holds_product_guard() {
    let h = Harness::new();
    register_items(&h);

    let queued = h.store.enqueue_product(USER, "A", false);
    assert!(h.store.is_guard_held(USER, GuardCategory::Product));

    let direct = h.store.purchase("B", USER);
    assert!(direct.outcome().unwrap().is_already_in_progress());

    h.provider.wait_for_prompts(1).await;
    h.store.product_purchase_finished(USER, ProductId(1), true);
    assert!(queued.wait().await.success);
}

#[tokio::test]
async fn test_direct_purchase_hands_over_to_queue() {
    let h = Harness::new();
    register_items(&h);

    let direct = h.store.purchase("A", USER);
    h.provider.wait_for_prompts(1).await;

    let queued = h.store.enqueue_product(USER, "B", false);
    assert_eq!(h.store.queue_len(USER), 1);
    settle().await;
    assert_eq!(h.provider.prompt_count(), 1);

    h.store.product_purchase_finished(USER, ProductId(1), true);
    assert!(direct.wait().await.success);

    h.provider.wait_for_prompts(2).await;
    assert_eq!(h.store.queue_len(USER), 0);
    h.store.product_purchase_finished(USER, ProductId(2), true);
    assert!(queued.wait().await.success);

    settle().await;
    assert!(!h.store.is_guard_held(USER, GuardCategory::Product));
}

#[tokio::test]
async fn test_panicking_invocation_is_contained() {
    let h = Harness::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let panicking = h
        .store
        .enqueue(USER, |_| -> FlowResult { panic!("flow bug") }, false);
    let sink = order.clone();
    let next = h.store.enqueue(
        USER,
        move |user| {
            sink.lock().unwrap().push(user);
            FlowResult::Immediate(HandleOutcome::succeeded())
        },
        false,
    );

    assert_eq!(
        panicking.wait().await.error.as_deref(),
        Some(CALLBACK_FAULT)
    );
    assert!(next.wait().await.success);
    assert_eq!(*order.lock().unwrap(), vec![USER]);

    settle().await;
    assert!(!h.store.is_guard_held(USER, GuardCategory::Product));
}

#[tokio::test]
async fn test_immediate_and_pending_results() {
    let h = Harness::new();

    let failed = h.store.enqueue(
        USER,
        |_| FlowResult::Immediate(HandleOutcome::failed("sold out")),
        false,
    );
    assert_eq!(failed.wait().await.error.as_deref(), Some("sold out"));

    let inner = shopkit_lib::AsyncHandle::new();
    let resolver = inner.clone();
    let pending = h
        .store
        .enqueue(USER, move |_| FlowResult::Pending(inner), false);
    settle().await;
    assert!(!pending.is_completed());
    assert!(h.store.is_guard_held(USER, GuardCategory::Product));

    resolver.resolve(true, None);
    assert!(pending.wait().await.success);
}

#[tokio::test]
async fn test_queues_are_per_user() {
    let h = Harness::new();
    register_items(&h);

    let first = h.store.enqueue_product(UserId(1), "A", false);
    let second = h.store.enqueue_product(UserId(2), "A", false);
    h.provider.wait_for_prompts(2).await;

    h.store
        .product_purchase_finished(UserId(2), ProductId(1), true);
    assert!(second.wait().await.success);
    assert!(!first.is_completed());

    h.store
        .product_purchase_finished(UserId(1), ProductId(1), true);
    assert!(first.wait().await.success);
}

#[tokio::test]
async fn test_leaving_fails_waiting_items() {
    let h = Harness::new();
    register_items(&h);
    h.store.player_joined(USER).await.unwrap();

    let running = h.store.enqueue_product(USER, "A", false);
    let waiting = h.store.enqueue_product(USER, "B", false);
    h.provider.wait_for_prompts(1).await;

    h.store.player_left(USER).await.unwrap();
    assert_eq!(waiting.wait().await.error.as_deref(), Some(SESSION_ENDED));

    // The running flow still finishes on its own.
    h.store.product_purchase_finished(USER, ProductId(1), true);
    assert!(running.wait().await.success);
    settle().await;
    assert_eq!(h.provider.prompt_count(), 1);
}

#[tokio::test]
async fn test_only_product_purchases_queue() {
    let h = Harness::new();
    h.store
        .register_entitlement("Pass", EntitlementId(5), PurchaseCallbacks::none());

    let outcome = h.store.enqueue_product(USER, "Pass", false).wait().await;
    assert!(!outcome.success);
    let outcome = h.store.enqueue_product(USER, "Missing", false).wait().await;
    assert!(!outcome.success);
    assert_eq!(h.store.queue_len(USER), 0);
}
