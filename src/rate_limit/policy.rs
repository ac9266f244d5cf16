//! Quota Policy
//!
//! Configuration for per-recipient dispatch quotas.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default rate limits
pub const DEFAULT_MAX_PER_WINDOW: u32 = 3; // dispatches per window
pub const DEFAULT_COOLDOWN_SECS: u64 = 3 * 60; // 3 minutes
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 3600; // 24 hours

/// Longest window accepted (one year)
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 3600;

/// Invalid policy values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_per_window must be at least 1")]
    ZeroQuota,

    #[error("{0} must be strictly positive")]
    NonPositive(&'static str),

    #[error("window must not exceed {MAX_WINDOW_SECS} seconds")]
    WindowTooLong,

    #[error("cooldown ({cooldown}s) must not exceed window ({window}s)")]
    CooldownExceedsWindow { cooldown: u64, window: u64 },
}

/// Quota policy for a class of dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Maximum admitted dispatches per rolling window
    pub max_per_window: u32,

    /// Minimum spacing between consecutive dispatches, in seconds
    pub cooldown_secs: u64,

    /// Rolling window length, in seconds
    pub window_secs: u64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl QuotaPolicy {
    /// Create a validated policy
    pub fn new(max_per_window: u32, cooldown_secs: u64, window_secs: u64) -> Result<Self, PolicyError> {
        let policy = Self {
            max_per_window,
            cooldown_secs,
            window_secs,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_per_window == 0 {
            return Err(PolicyError::ZeroQuota);
        }
        if self.cooldown_secs == 0 {
            return Err(PolicyError::NonPositive("cooldown"));
        }
        if self.window_secs == 0 {
            return Err(PolicyError::NonPositive("window"));
        }
        if self.window_secs > MAX_WINDOW_SECS {
            return Err(PolicyError::WindowTooLong);
        }
        if self.cooldown_secs > self.window_secs {
            return Err(PolicyError::CooldownExceedsWindow {
                cooldown: self.cooldown_secs,
                window: self.window_secs,
            });
        }
        Ok(())
    }

    /// Cooldown as a signed duration
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs.min(MAX_WINDOW_SECS) as i64)
    }

    /// Window as a signed duration
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}
