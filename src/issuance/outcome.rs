//! Request Outcomes
//!
//! What `request_code` returns, and the wire shape callers see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rate_limit::{RejectReason, Rejection};
use crate::recipient::Recipient;

/// A code that was admitted and handed to delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub code_id: Uuid,
    pub recipient: Recipient,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a code request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Admitted(Admission),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Admitted(_) => None,
            Outcome::Rejected(rejection) => Some(rejection),
        }
    }

    /// Whole seconds until the next possible admission; `None` when admitted
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.rejection().map(Rejection::retry_after_secs)
    }
}

/// Response body for a code request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub admitted: bool,
    pub retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Outcome> for AdmissionResponse {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Admitted(admission) => Self {
                admitted: true,
                retry_after_seconds: None,
                reason: None,
                message: None,
                expires_at: Some(admission.expires_at),
            },
            Outcome::Rejected(rejection) => Self {
                admitted: false,
                retry_after_seconds: Some(rejection.retry_after_secs()),
                reason: Some(rejection.reason),
                message: Some(rejection.message()),
                expires_at: None,
            },
        }
    }
}
