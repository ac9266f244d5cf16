// Backoff schedule for handing codes to a delivery channel
//
// A code is only useful until it expires, so the schedule is short: the
// default backoff waits 7.5 seconds in total across four retries. The
// dispatcher also stops retrying once the code has expired.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upper bound on a single attempt's timeout
const MAX_ATTEMPT_TIMEOUT_SECS: u64 = 60;

/// How failed deliveries are retried
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// No single delay exceeds this, in milliseconds
    pub max_delay_ms: u64,

    /// Double the delay on every retry
    pub exponential: bool,

    /// Spread retries by up to 20% of the delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_retries: 4,
            max_delay_ms: 30_000,
            exponential: true,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Try again after this many milliseconds
    Retry(u64),
    /// Move the message to the dead-letter queue
    GiveUp,
}

/// Delay before retrying a message whose attempt number `attempt` failed
pub fn next_delay(attempt: u32, config: &RetryConfig) -> RetryDecision {
    if attempt >= config.max_retries {
        debug!(
            attempt,
            max_retries = config.max_retries,
            "Delivery retries used up"
        );
        return RetryDecision::GiveUp;
    }

    let scheduled = if config.exponential {
        config
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
    } else {
        config.base_delay_ms
    }
    .min(config.max_delay_ms);

    let delay_ms = if config.jitter {
        spread(scheduled)
    } else {
        scheduled
    };

    debug!(attempt, delay_ms, "Scheduling delivery retry");
    RetryDecision::Retry(delay_ms)
}

/// Uniform pick within ±20% of `delay_ms`
fn spread(delay_ms: u64) -> u64 {
    let margin = delay_ms / 5;
    if margin == 0 {
        return delay_ms;
    }
    rand::rng().random_range(delay_ms - margin..=delay_ms.saturating_add(margin))
}

/// Timeout for attempt number `attempt`: grows by half the base per retry
pub fn attempt_timeout(attempt: u32, base_timeout_secs: u64) -> Duration {
    let extra = base_timeout_secs.saturating_mul(u64::from(attempt)) / 2;
    Duration::from_secs(
        base_timeout_secs
            .saturating_add(extra)
            .min(MAX_ATTEMPT_TIMEOUT_SECS),
    )
}
