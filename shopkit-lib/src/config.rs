//! Configuration for the storefront engine.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings.
///
/// Every field has a serde default, so a partial JSON document (or `{}`) is a
/// valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopkitConfig {
    /// How long a purchase flow waits for the provider before timing out.
    #[serde(default = "default_purchase_timeout")]
    pub purchase_timeout_secs: u64,

    /// Processed receipt ids kept per profile for exactly-once acknowledgment.
    #[serde(default = "default_receipt_history_limit")]
    pub receipt_history_limit: usize,

    /// Prefix of persisted profile document keys.
    #[serde(default = "default_profile_key_prefix")]
    pub profile_key_prefix: String,

    /// Reason shown to a user whose profile failed to load.
    #[serde(default = "default_load_failure_message")]
    pub profile_load_failure_message: String,

    /// Reason shown to a user whose profile lease was taken elsewhere.
    #[serde(default = "default_revoked_message")]
    pub profile_revoked_message: String,

    /// Completions buffered per waiting flow; extras for the same flow are
    /// dropped with a warning.
    #[serde(default = "default_completion_channel_capacity")]
    pub completion_channel_capacity: usize,
}

fn default_purchase_timeout() -> u64 {
    60
}

fn default_receipt_history_limit() -> usize {
    50
}

fn default_profile_key_prefix() -> String {
    "Player_".to_string()
}

fn default_load_failure_message() -> String {
    "Your data could not be loaded. Please rejoin.".to_string()
}

fn default_revoked_message() -> String {
    "Your data was loaded on another server. Please rejoin.".to_string()
}

fn default_completion_channel_capacity() -> usize {
    16
}

impl Default for ShopkitConfig {
    fn default() -> Self {
        Self {
            purchase_timeout_secs: default_purchase_timeout(),
            receipt_history_limit: default_receipt_history_limit(),
            profile_key_prefix: default_profile_key_prefix(),
            profile_load_failure_message: default_load_failure_message(),
            profile_revoked_message: default_revoked_message(),
            completion_channel_capacity: default_completion_channel_capacity(),
        }
    }
}

impl ShopkitConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.purchase_timeout_secs == 0 {
            return Err(crate::ShopkitError::invalid_input(
                "purchase_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.receipt_history_limit == 0 {
            return Err(crate::ShopkitError::invalid_input(
                "receipt_history_limit",
                "must be greater than zero",
            ));
        }
        if self.completion_channel_capacity == 0 {
            return Err(crate::ShopkitError::invalid_input(
                "completion_channel_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Flow timeout as a [`Duration`].
    pub fn purchase_timeout(&self) -> Duration {
        Duration::from_secs(self.purchase_timeout_secs)
    }

    /// Set the purchase timeout.
    pub fn with_purchase_timeout(mut self, secs: u64) -> Self {
        self.purchase_timeout_secs = secs;
        self
    }

    /// Set the receipt history limit.
    pub fn with_receipt_history_limit(mut self, limit: usize) -> Self {
        self.receipt_history_limit = limit;
        self
    }

    /// Set the profile key prefix.
    pub fn with_profile_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.profile_key_prefix = prefix.into();
        self
    }
}
