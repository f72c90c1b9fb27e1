//! Persisted per-user profile documents.
//!
//! A [`ProfileStore`] hands out exclusive leases on documents. While a lease
//! is held no other session may write the document; if the store gives the
//! lease to someone else it flips the lease's `revoked` channel and the
//! holder must stop writing immediately.

mod file;
mod memory;

pub use file::FileProfileStore;
pub use memory::MemoryProfileStore;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::watch;
use uuid::Uuid;

/// The persisted document of one user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    /// Currency id to balance.
    #[serde(default)]
    pub currencies: BTreeMap<String, i64>,
    /// Most recent processed receipt purchase ids, oldest first.
    #[serde(default)]
    pub processed_receipts: VecDeque<String>,
    /// Application data this crate does not interpret.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Unix timestamp of the last save.
    #[serde(default)]
    pub updated_at: i64,
}

impl ProfileDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill fields missing from `self` with the template's values.
    ///
    /// Existing values are never overwritten. Returns the number of fields
    /// filled.
    pub fn reconcile(&mut self, template: &ProfileDocument) -> usize {
        let mut filled = 0;
        for (currency, default) in &template.currencies {
            if !self.currencies.contains_key(currency) {
                self.currencies.insert(currency.clone(), *default);
                filled += 1;
            }
        }
        for (key, value) in &template.data {
            if !self.data.contains_key(key) {
                self.data.insert(key.clone(), value.clone());
                filled += 1;
            }
        }
        filled
    }

    pub fn has_processed_receipt(&self, purchase_id: &str) -> bool {
        self.processed_receipts.iter().any(|id| id == purchase_id)
    }

    /// Remember a processed receipt, evicting the oldest beyond `limit`.
    /// Recording an id already in the history is a no-op.
    pub fn record_processed_receipt(&mut self, purchase_id: impl Into<String>, limit: usize) {
        let purchase_id = purchase_id.into();
        if self.has_processed_receipt(&purchase_id) {
            return;
        }
        self.processed_receipts.push_back(purchase_id);
        while self.processed_receipts.len() > limit {
            self.processed_receipts.pop_front();
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Identifies a held lease when saving or releasing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeaseToken {
    pub key: String,
    pub lease_id: Uuid,
}

/// An exclusive lease on a loaded document.
#[derive(Debug)]
pub struct ProfileLease {
    pub key: String,
    pub lease_id: Uuid,
    pub document: ProfileDocument,
    /// Flips to `true` when the store hands the lease to another holder.
    pub revoked: watch::Receiver<bool>,
}

impl ProfileLease {
    pub fn token(&self) -> LeaseToken {
        LeaseToken {
            key: self.key.clone(),
            lease_id: self.lease_id,
        }
    }
}

/// Persistent store of profile documents with exclusive leases.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Load a document and take its exclusive lease.
    ///
    /// Fails with `ProfileLoadFailure` if the lease cannot be acquired.
    async fn load_exclusive(&self, key: &str) -> Result<ProfileLease>;

    /// Persist a document under a held lease.
    async fn save(&self, lease: &LeaseToken, document: &ProfileDocument) -> Result<()>;

    /// Persist the final document and give the lease up.
    async fn release(&self, lease: LeaseToken, document: &ProfileDocument) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_fills_only_missing() {
        let mut doc = ProfileDocument::new();
        doc.currencies.insert("Gems".into(), 40);

        let mut template = ProfileDocument::new();
        template.currencies.insert("Gems".into(), 0);
        template.currencies.insert("Coins".into(), 100);
        template
            .data
            .insert("tutorial_done".into(), serde_json::Value::Bool(false));

        assert_eq!(doc.reconcile(&template), 2);
        assert_eq!(doc.currencies["Gems"], 40);
        assert_eq!(doc.currencies["Coins"], 100);
        assert_eq!(doc.reconcile(&template), 0);
    }

    #[test]
    fn test_receipt_history_is_bounded() {
        let mut doc = ProfileDocument::new();
        for i in 0..5 {
            doc.record_processed_receipt(format!("p{}", i), 3);
        }
        assert_eq!(doc.processed_receipts.len(), 3);
        assert!(!doc.has_processed_receipt("p1"));
        assert!(doc.has_processed_receipt("p2"));
        assert!(doc.has_processed_receipt("p4"));
    }

    #[test]
    fn test_recording_twice_keeps_one_entry() {
        let mut doc = ProfileDocument::new();
        doc.record_processed_receipt("p1", 3);
        doc.record_processed_receipt("p2", 3);
        doc.record_processed_receipt("p1", 3);
        assert_eq!(doc.processed_receipts.len(), 2);
    }

    #[test]
    fn test_empty_json_document() {
        let doc: ProfileDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc, ProfileDocument::default());
    }
}
