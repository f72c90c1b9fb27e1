//! Error types for Shopkit operations.
//!
//! Every failure a ledger operation, purchase flow or session transition can
//! report is a variant of [`ShopkitError`]. Flow-terminal outcomes are still
//! surfaced through `PurchaseCompleted`/`PurchaseFailed` events; the error type
//! is what synchronous callers see.

use crate::UserId;

/// Error codes for host integration (e.g. telemetry or scripting bridges).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ShopkitErrorCode {
    /// Bad user, currency or amount
    InvalidInput = 1000,
    /// Resource not registered
    NotRegistered = 1001,
    /// Deduct would take a balance negative
    InsufficientFunds = 2000,
    /// Guard category already held for this user
    AlreadyInProgress = 3000,
    /// Provider never responded
    Timeout = 3001,
    /// Transacting is frozen by the kill switch
    TransactionsDisabled = 3002,
    /// No active session for the user
    NoSession = 4000,
    /// Profile lease could not be acquired
    ProfileLoadFailure = 4001,
    /// User supplied callback failed
    CallbackFault = 5000,
    /// Storage error
    Storage = 7000,
    /// Serialization error
    Serialization = 7001,
}

/// Comprehensive error type for Shopkit operations.
#[derive(thiserror::Error, Debug)]
pub enum ShopkitError {
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("{resource_type} not registered: {identifier}")]
    NotRegistered {
        resource_type: String,
        identifier: String,
    },

    #[error("insufficient funds: need {required} {currency}, have {available} {currency}")]
    InsufficientFunds {
        currency: String,
        required: i64,
        available: i64,
    },

    #[error("{category} purchase already in progress")]
    AlreadyInProgress { category: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("transactions are disabled")]
    TransactionsDisabled,

    #[error("user {0} has no active session")]
    NoSession(UserId),

    #[error("profile {key} failed to load: {reason}")]
    ProfileLoadFailure { key: String, reason: String },

    #[error("callback fault: {0}")]
    CallbackFault(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ShopkitError {
    /// Get the error code for host integration.
    pub fn code(&self) -> ShopkitErrorCode {
        match self {
            Self::InvalidInput { .. } => ShopkitErrorCode::InvalidInput,
            Self::NotRegistered { .. } => ShopkitErrorCode::NotRegistered,
            Self::InsufficientFunds { .. } => ShopkitErrorCode::InsufficientFunds,
            Self::AlreadyInProgress { .. } => ShopkitErrorCode::AlreadyInProgress,
            Self::Timeout { .. } => ShopkitErrorCode::Timeout,
            Self::TransactionsDisabled => ShopkitErrorCode::TransactionsDisabled,
            Self::NoSession(_) => ShopkitErrorCode::NoSession,
            Self::ProfileLoadFailure { .. } => ShopkitErrorCode::ProfileLoadFailure,
            Self::CallbackFault(_) => ShopkitErrorCode::CallbackFault,
            Self::Storage(_) => ShopkitErrorCode::Storage,
            Self::Serialization(_) => ShopkitErrorCode::Serialization,
        }
    }

    /// Returns true if the caller may succeed by re-invoking later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress { .. }
                | Self::Timeout { .. }
                | Self::TransactionsDisabled
                | Self::Storage(_)
        )
    }

    /// Returns true if the owning session must be ended.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Self::ProfileLoadFailure { .. })
    }

    /// Create an invalid input error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not registered error.
    pub fn not_registered(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotRegistered {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }
}

impl From<serde_json::Error> for ShopkitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ShopkitError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ShopkitError::AlreadyInProgress {
            category: "product".into(),
        };
        assert_eq!(err.code(), ShopkitErrorCode::AlreadyInProgress);
        assert!(err.is_retryable());
        assert!(!err.is_fatal_for_session());
    }

    #[test]
    fn test_error_display() {
        let err = ShopkitError::InsufficientFunds {
            currency: "Gems".to_string(),
            required: 50,
            available: 10,
        };
        assert!(err.to_string().contains("insufficient funds"));
        assert!(err.to_string().contains("Gems"));
    }

    #[test]
    fn test_profile_failure_is_fatal() {
        let err = ShopkitError::ProfileLoadFailure {
            key: "Player_1".into(),
            reason: "locked".into(),
        };
        assert!(err.is_fatal_for_session());
        assert_eq!(err.code(), ShopkitErrorCode::ProfileLoadFailure);
    }

    #[test]
    fn test_helper_constructors() {
        let err = ShopkitError::not_registered("currency", "Gems");
        assert_eq!(err.code(), ShopkitErrorCode::NotRegistered);

        let err = ShopkitError::invalid_input("amount", "must be positive");
        assert_eq!(err.code(), ShopkitErrorCode::InvalidInput);
        assert_eq!(err.to_string(), "invalid amount: must be positive");
    }
}
