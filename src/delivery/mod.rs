// Code delivery
//
// Handles:
// - The DeliveryChannel seam to the outside transport (email, SMS, webhook)
// - Non-blocking handoff from the admission path to a background worker
// - Retry logic with exponential backoff
// - Dead letter queue for codes that could not be delivered

pub mod channels;
pub mod dead_letter;
pub mod dispatcher;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::recipient::Recipient;

pub use channels::{LogChannel, WebhookChannel};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, DeadLetterStats, DeadLetterStatus};
pub use dispatcher::{DeliveryDispatcher, DeliveryStats};
pub use retry::{RetryConfig, RetryDecision};

/// Delivery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Network or I/O failure talking to the transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport answered with a non-success status
    #[error("transport rejected delivery with status {0}")]
    Rejected(u16),

    /// Transport refused the message for good
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// Handoff queue is full
    #[error("delivery queue is full")]
    QueueFull,

    /// Worker is gone
    #[error("delivery queue is closed")]
    QueueClosed,
}

impl DeliveryError {
    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Rejected(status) => is_retryable_status(*status),
            DeliveryError::Permanent(_) | DeliveryError::QueueFull | DeliveryError::QueueClosed => {
                false
            }
        }
    }
}

/// Check if an HTTP status code is retryable
pub fn is_retryable_status(status: u16) -> bool {
    matches!(
        status,
        408 | // Request Timeout
        429 | // Too Many Requests
        500 | // Internal Server Error
        502 | // Bad Gateway
        503 | // Service Unavailable
        504   // Gateway Timeout
    )
}

/// A code handed to the delivery channel
#[derive(Clone, Serialize)]
pub struct CodeMessage {
    /// Message id; stable across retries so transports can deduplicate
    pub id: Uuid,
    pub code_id: Uuid,
    pub recipient: Recipient,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CodeMessage {
    pub fn new(
        code_id: Uuid,
        recipient: Recipient,
        code: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code_id,
            recipient,
            code,
            issued_at,
            expires_at,
        }
    }
}

impl fmt::Debug for CodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeMessage")
            .field("id", &self.id)
            .field("code_id", &self.code_id)
            .field("recipient", &self.recipient)
            .field("code", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Outbound transport for verification codes
///
/// Implementations are called from the background worker, never from the
/// admission path. Duplicate deliveries are acceptable.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Attempt one delivery; `attempt` is zero-indexed
    async fn deliver(&self, message: &CodeMessage, attempt: u32) -> Result<(), DeliveryError>;
}
