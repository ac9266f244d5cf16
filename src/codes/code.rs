//! Verification Code Entity and Generation

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::recipient::Recipient;

/// Default code length
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Default lifetime of an issued code (3 minutes)
pub const DEFAULT_VALIDITY_SECS: u64 = 180;

/// Characters a code is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeAlphabet {
    /// Digits only
    Numeric,
    /// Upper and lower case ASCII letters and digits
    Alphanumeric,
}

/// Code generation and expiry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    /// Number of characters in a code
    pub length: usize,

    /// Character set
    pub alphabet: CodeAlphabet,

    /// Seconds a code stays valid after issuance
    pub validity_secs: u64,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
            alphabet: CodeAlphabet::Numeric,
            validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }
}

impl CodeConfig {
    /// Validity window as a signed duration
    pub fn validity(&self) -> Duration {
        Duration::seconds(self.validity_secs.min(i64::MAX as u64 / 1000) as i64)
    }

    /// Check the configured values
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(4..=12).contains(&self.length) {
            anyhow::bail!("Code length must be between 4 and 12, got {}", self.length);
        }
        if self.validity_secs == 0 {
            anyhow::bail!("Code validity must be > 0 seconds");
        }
        if self.validity_secs > 24 * 3600 {
            anyhow::bail!("Code validity must be at most 24 hours");
        }
        Ok(())
    }

    /// Generate a fresh code from the thread-local CSPRNG
    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        match self.alphabet {
            CodeAlphabet::Numeric => (0..self.length)
                .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
                .collect(),
            CodeAlphabet::Alphanumeric => (&mut rng)
                .sample_iter(Alphanumeric)
                .take(self.length)
                .map(char::from)
                .collect(),
        }
    }
}

/// A one-time code issued to a recipient
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: Uuid,
    pub recipient: Recipient,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub verified: bool,
}

impl VerificationCode {
    /// Create an unverified code issued at `issued_at`
    pub fn new(recipient: Recipient, code: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            code,
            issued_at,
            verified: false,
        }
    }

    /// `now - issued_at > validity`
    pub fn is_expired(&self, now: DateTime<Utc>, validity: Duration) -> bool {
        now - self.issued_at > validity
    }

    /// Unverified and not expired
    pub fn is_valid(&self, now: DateTime<Utc>, validity: Duration) -> bool {
        !self.verified && !self.is_expired(now, validity)
    }

    /// Instant after which the code is expired
    pub fn expires_at(&self, validity: Duration) -> DateTime<Utc> {
        self.issued_at + validity
    }
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationCode")
            .field("id", &self.id)
            .field("recipient", &self.recipient)
            .field("code", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("verified", &self.verified)
            .finish()
    }
}
