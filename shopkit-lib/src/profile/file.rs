//! File-backed profile store.
//!
//! Documents are JSON files under a base directory. A lease is an `fs2`
//! exclusive lock on a sibling `.lock` file, held for as long as the lease
//! lives, so two processes sharing the directory cannot both own a profile.

use super::{LeaseToken, ProfileDocument, ProfileLease, ProfileStore};
use crate::{Result, ShopkitError};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

struct HeldLease {
    lease_id: Uuid,
    lock_file: File,
    revoked: watch::Sender<bool>,
}

/// Profile store persisting documents as JSON files.
pub struct FileProfileStore {
    base_path: PathBuf,
    leases: Mutex<HashMap<String, HeldLease>>,
}

impl FileProfileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            leases: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", sanitize(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.lock", sanitize(key)))
    }

    fn read_document(&self, key: &str) -> Result<ProfileDocument> {
        let path = self.document_path(key);
        if !path.exists() {
            return Ok(ProfileDocument::default());
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_document(&self, key: &str, document: &ProfileDocument) -> Result<()> {
        let path = self.document_path(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(document)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    fn check_lease(&self, lease: &LeaseToken) -> Result<()> {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(&lease.key) {
            Some(held) if held.lease_id == lease.lease_id => Ok(()),
            _ => Err(ShopkitError::Storage(format!(
                "lease on {} is no longer held",
                lease.key
            ))),
        }
    }

    /// Revoke a held lease and unlock its document.
    pub fn revoke(&self, key: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.remove(key) {
            Some(held) => {
                held.revoked.send_replace(true);
                held.lock_file.unlock()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Keep keys from escaping the base directory.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn load_exclusive(&self, key: &str) -> Result<ProfileLease> {
        let load_failure = |reason: String| ShopkitError::ProfileLoadFailure {
            key: key.to_string(),
            reason,
        };

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(key))
            .map_err(|e| load_failure(e.to_string()))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(load_failure("profile is leased by another session".into()));
        }

        let document = match self.read_document(key) {
            Ok(document) => document,
            Err(e) => {
                lock_file.unlock()?;
                return Err(load_failure(e.to_string()));
            }
        };

        let lease_id = Uuid::new_v4();
        let (tx, rx) = watch::channel(false);

        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.insert(
            key.to_string(),
            HeldLease {
                lease_id,
                lock_file,
                revoked: tx,
            },
        );

        Ok(ProfileLease {
            key: key.to_string(),
            lease_id,
            document,
            revoked: rx,
        })
    }

    async fn save(&self, lease: &LeaseToken, document: &ProfileDocument) -> Result<()> {
        self.check_lease(lease)?;
        self.write_document(&lease.key, document)
    }

    async fn release(&self, lease: LeaseToken, document: &ProfileDocument) -> Result<()> {
        self.check_lease(&lease)?;
        self.write_document(&lease.key, document)?;

        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = leases.remove(&lease.key) {
            held.lock_file.unlock()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path()).unwrap();

        let lease = store.load_exclusive("Player_7").await.unwrap();
        let mut doc = lease.document.clone();
        doc.currencies.insert("Gems".into(), 120);
        doc.record_processed_receipt("abc", 10);
        store.release(lease.token(), &doc).await.unwrap();

        let reopened = FileProfileStore::new(dir.path()).unwrap();
        let lease = reopened.load_exclusive("Player_7").await.unwrap();
        assert_eq!(lease.document.currencies["Gems"], 120);
        assert!(lease.document.has_processed_receipt("abc"));
    }

    #[tokio::test]
    async fn test_second_process_cannot_lease() {
        let dir = TempDir::new().unwrap();
        let first = FileProfileStore::new(dir.path()).unwrap();
        let second = FileProfileStore::new(dir.path()).unwrap();

        let _lease = first.load_exclusive("Player_1").await.unwrap();
        let err = second.load_exclusive("Player_1").await.unwrap_err();
        assert!(err.is_fatal_for_session());
    }

    #[tokio::test]
    async fn test_revoke_blocks_writes() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path()).unwrap();

        let lease = store.load_exclusive("Player_1").await.unwrap();
        assert!(store.revoke("Player_1").unwrap());
        assert!(*lease.revoked.borrow());
        assert!(store
            .save(&lease.token(), &ProfileDocument::default())
            .await
            .is_err());
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize("../Player_1"), "___Player_1");
    }
}
