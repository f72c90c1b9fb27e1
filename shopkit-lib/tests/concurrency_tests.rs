//! Concurrency stress tests for guards, the ledger and receipts.
//!
//! These tests verify the per-user invariants hold under contention on a
//! multi-threaded runtime.

#[cfg(test)]
mod concurrency_tests {
    use shopkit_lib::simulated::{RecordingHost, SimulatedProvider};
    use shopkit_lib::{
        CurrencyDefinition, MemoryProfileStore, ProductId, PurchaseCallbacks, ReceiptDecision,
        ReceiptInfo, ShopkitConfig, ShopkitErrorCode, Storefront, UserId,
    };
    use std::sync::Arc;
    use tokio::task::JoinSet;

    fn storefront() -> (Storefront, Arc<SimulatedProvider>) {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Storefront::new(
            ShopkitConfig::default(),
            provider.clone(),
            Arc::new(MemoryProfileStore::new()),
            Arc::new(RecordingHost::new()),
        );
        (store, provider)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_invocations_prompt_once() {
        let (store, provider) = storefront();
        store.register_product("Sword", ProductId(7), PurchaseCallbacks::none());
        let mut tasks = JoinSet::new();

        // 100 concurrent attempts at the same purchase for one user
        for _ in 0..100 {
            let store = store.clone();
            tasks.spawn(async move { store.purchase("Sword", UserId(1)) });
        }

        let mut pending = Vec::new();
        let mut suppressed = 0;
        while let Some(result) = tasks.join_next().await {
            let handle = result.unwrap();
            match handle.outcome() {
                Some(outcome) if outcome.is_already_in_progress() => suppressed += 1,
                Some(outcome) => panic!("unexpected outcome {:?}", outcome),
                None => pending.push(handle),
            }
        }

        assert_eq!(pending.len(), 1, "exactly one flow should start");
        assert_eq!(suppressed, 99);

        provider.wait_for_prompts(1).await;
        store.product_purchase_finished(UserId(1), ProductId(7), true);
        assert!(pending[0].wait().await.success);
        assert_eq!(provider.prompt_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_users_purchase_in_parallel() {
        let (store, provider) = storefront();
        store.register_product("Sword", ProductId(7), PurchaseCallbacks::none());
        let mut tasks = JoinSet::new();

        for user in 0..50u64 {
            let store = store.clone();
            tasks.spawn(async move { store.purchase("Sword", UserId(user)) });
        }

        let mut handles = Vec::new();
        while let Some(result) = tasks.join_next().await {
            let handle = result.unwrap();
            assert!(!handle.is_completed(), "every user gets their own guard");
            handles.push(handle);
        }

        provider.wait_for_prompts(50).await;
        for user in 0..50u64 {
            store.product_purchase_finished(UserId(user), ProductId(7), true);
        }
        for handle in handles {
            assert!(handle.wait().await.success);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deducts_never_overdraw() {
        let (store, _) = storefront();
        let coins = CurrencyDefinition::new("Coins", "Coins", "C").with_default_value(50);
        store.register_currency(coins).unwrap();
        store.player_joined(UserId(1)).await.unwrap();
        let mut tasks = JoinSet::new();

        for _ in 0..100 {
            let store = store.clone();
            tasks.spawn(async move { store.deduct_currency(UserId(1), "Coins", 1) });
        }

        let mut success_count = 0;
        let mut insufficient_count = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(balance) => {
                    assert!(balance >= 0);
                    success_count += 1;
                }
                Err(e) if e.code() == ShopkitErrorCode::InsufficientFunds => {
                    insufficient_count += 1
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(success_count, 50);
        assert_eq!(insufficient_count, 50);
        assert_eq!(store.balance(UserId(1), "Coins"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_receipt_redelivery_grants_once() {
        let (store, _) = storefront();
        store
            .register_currency(
                CurrencyDefinition::new("Gems", "Gems", "G").with_price_point(100, ProductId(555)),
            )
            .unwrap();
        store.player_joined(UserId(1)).await.unwrap();
        let mut tasks = JoinSet::new();

        for _ in 0..20 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .process_receipt(ReceiptInfo::new(UserId(1), ProductId(555), "txn-1"))
                    .await
            });
        }

        let mut granted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() == ReceiptDecision::PurchaseGranted {
                granted += 1;
            }
        }

        assert!(granted >= 1);
        assert_eq!(store.balance(UserId(1), "Gems"), 100);

        // Any deferred delivery is acknowledged on retry without a regrant.
        let retry = store
            .process_receipt(ReceiptInfo::new(UserId(1), ProductId(555), "txn-1"))
            .await;
        assert_eq!(retry, ReceiptDecision::PurchaseGranted);
        assert_eq!(store.balance(UserId(1), "Gems"), 100);
    }
}
