//! Error Types
//!
//! Errors surfaced by the issuance path and its storage seams. Rejections
//! (quota exceeded, too soon) are not errors; they are
//! [`Outcome`](crate::issuance::Outcome) variants.

use crate::recipient::RecipientError;

/// Storage backend failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend cannot be reached or refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Row referenced by id does not exist
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors returned by [`IssuanceService`](crate::issuance::IssuanceService)
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Caller supplied a malformed recipient
    #[error("invalid recipient: {0}")]
    InvalidRecipient(#[from] RecipientError),

    /// Ledger or code store could not be read or written; the request was
    /// not admitted
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// No valid code matches the recipient and value
    #[error("verification code not found or expired")]
    CodeNotFound,
}

impl IssuanceError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, IssuanceError::StorageUnavailable(_))
    }
}

impl From<StoreError> for IssuanceError {
    fn from(err: StoreError) -> Self {
        IssuanceError::StorageUnavailable(err.to_string())
    }
}
