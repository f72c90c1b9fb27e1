//! CLI command implementations

pub mod balance;
pub mod buy;
pub mod catalog;
pub mod receipt;
pub mod scenario;

use crate::catalog::CatalogConfig;
use crate::ui;
use anyhow::Result;
use shopkit_lib::simulated::{RecordingHost, SimulatedProvider};
use shopkit_lib::{FileProfileStore, Storefront, UserId};
use std::path::Path;
use std::sync::Arc;

/// A storefront wired to the simulated provider and on-disk profiles.
pub struct Shop {
    pub store: Storefront,
    pub provider: Arc<SimulatedProvider>,
    pub host: Arc<RecordingHost>,
}

impl Shop {
    pub fn open(storage_dir: &Path, catalog: &CatalogConfig) -> Result<Self> {
        let profiles = Arc::new(FileProfileStore::new(storage_dir.join("profiles"))?);
        let provider = Arc::new(SimulatedProvider::new());
        let host = Arc::new(RecordingHost::new());
        let store = Storefront::new(
            catalog.engine.clone(),
            provider.clone(),
            profiles,
            host.clone(),
        );
        catalog.register(&store)?;
        Ok(Self {
            store,
            provider,
            host,
        })
    }

    /// Leave so the profile is saved, then report any kicks.
    pub async fn leave(&self, user: UserId) -> Result<()> {
        self.store.player_left(user).await?;
        for (kicked, reason) in self.host.kicks() {
            ui::warning(&format!("User {} kicked: {}", kicked, reason));
        }
        Ok(())
    }
}

/// Print every balance of a user.
pub fn print_balances(store: &Storefront, user: UserId) {
    for (currency, balance) in store.balances(user) {
        let rendered = store
            .currencies()
            .get(&currency)
            .map(|definition| definition.format(balance))
            .unwrap_or_else(|| balance.to_string());
        ui::key_value(&currency, &rendered);
    }
}
