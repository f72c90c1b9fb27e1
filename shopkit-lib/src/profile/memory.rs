//! In-memory profile store.

use super::{LeaseToken, ProfileDocument, ProfileLease, ProfileStore};
use crate::{Result, ShopkitError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

struct Entry {
    document: ProfileDocument,
    lease: Option<(Uuid, watch::Sender<bool>)>,
}

/// Profile store kept in process memory.
///
/// Loading a key that is already leased steals the lease: the previous holder
/// is revoked, the way a duplicate session on another server would be.
#[derive(Default)]
pub struct MemoryProfileStore {
    entries: Mutex<HashMap<String, Entry>>,
    fail_next_load: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document.
    pub fn insert(&self, key: impl Into<String>, document: ProfileDocument) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.into(),
            Entry {
                document,
                lease: None,
            },
        );
    }

    /// Last persisted version of a document.
    pub fn peek(&self, key: &str) -> Option<ProfileDocument> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.document.clone())
    }

    pub fn is_leased(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).is_some_and(|e| e.lease.is_some())
    }

    /// Revoke the current lease on `key` without granting a new one.
    pub fn revoke(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key).and_then(|e| e.lease.take()) {
            Some((_, revoked)) => {
                revoked.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Make the next `load_exclusive` fail.
    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    /// Make every `save` fail until turned off again.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_exclusive(&self, key: &str) -> Result<ProfileLease> {
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(ShopkitError::ProfileLoadFailure {
                key: key.to_string(),
                reason: "store unavailable".to_string(),
            });
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            document: ProfileDocument::default(),
            lease: None,
        });

        if let Some((previous, revoked)) = entry.lease.take() {
            tracing::warn!(key, lease = %previous, "profile leased elsewhere, stealing lease");
            revoked.send_replace(true);
        }

        let lease_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(false);
        entry.lease = Some((lease_id, tx));

        Ok(ProfileLease {
            key: key.to_string(),
            lease_id,
            document: entry.document.clone(),
            revoked: rx,
        })
    }

    async fn save(&self, lease: &LeaseToken, document: &ProfileDocument) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ShopkitError::Storage("save failed".to_string()));
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(&lease.key)
            .ok_or_else(|| ShopkitError::Storage(format!("no document {}", lease.key)))?;

        match &entry.lease {
            Some((id, _)) if *id == lease.lease_id => {
                entry.document = document.clone();
                Ok(())
            }
            _ => Err(ShopkitError::Storage(format!(
                "lease on {} is no longer held",
                lease.key
            ))),
        }
    }

    async fn release(&self, lease: LeaseToken, document: &ProfileDocument) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(&lease.key)
            .ok_or_else(|| ShopkitError::Storage(format!("no document {}", lease.key)))?;

        match &entry.lease {
            Some((id, _)) if *id == lease.lease_id => {
                entry.document = document.clone();
                entry.lease = None;
                Ok(())
            }
            _ => Err(ShopkitError::Storage(format!(
                "lease on {} is no longer held",
                lease.key
            ))),
        }
    }
}
