//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use shopkit_lib::simulated::{RecordingHost, SimulatedProvider};
use shopkit_lib::{
    CurrencyAdded, MemoryProfileStore, PurchaseCompleted, PurchaseFailed, ShopkitConfig,
    Storefront,
};
use std::sync::{Arc, Mutex};

pub struct Harness {
    pub store: Storefront,
    pub provider: Arc<SimulatedProvider>,
    pub profiles: Arc<MemoryProfileStore>,
    pub host: Arc<RecordingHost>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ShopkitConfig::default())
    }

    pub fn with_config(config: ShopkitConfig) -> Self {
        Self::with_profiles(config, Arc::new(MemoryProfileStore::new()))
    }

    /// A fresh engine over an existing store, as after a restart.
    pub fn with_profiles(config: ShopkitConfig, profiles: Arc<MemoryProfileStore>) -> Self {
        let provider = Arc::new(SimulatedProvider::new());
        let host = Arc::new(RecordingHost::new());
        let store = Storefront::new(config, provider.clone(), profiles.clone(), host.clone());
        Self {
            store,
            provider,
            profiles,
            host,
        }
    }

    pub fn completed(&self) -> Arc<Mutex<Vec<PurchaseCompleted>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.store
            .events()
            .purchase_completed
            .connect(move |e: &PurchaseCompleted| sink.lock().unwrap().push(e.clone()));
        seen
    }

    pub fn failed(&self) -> Arc<Mutex<Vec<PurchaseFailed>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.store
            .events()
            .purchase_failed
            .connect(move |e: &PurchaseFailed| sink.lock().unwrap().push(e.clone()));
        seen
    }

    pub fn currency_added(&self) -> Arc<Mutex<Vec<CurrencyAdded>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.store
            .events()
            .currency_added
            .connect(move |e: &CurrencyAdded| sink.lock().unwrap().push(e.clone()));
        seen
    }
}

/// Yield until `condition` holds, failing the test if it never does.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
