//! Admission Arithmetic
//!
//! Pure window/cooldown evaluation over a recipient's dispatch history. No
//! I/O and no locking happens here; the issuance service supplies the
//! records and serializes calls per recipient.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::DispatchRecord;
use super::policy::QuotaPolicy;
use crate::recipient::Recipient;

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// `max_per_window` dispatches already happened inside the window
    QuotaExceeded,
    /// The previous dispatch is younger than the cooldown
    TooSoon,
}

impl RejectReason {
    /// Stable label for metrics and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QuotaExceeded => "quota_exceeded",
            RejectReason::TooSoon => "too_soon",
        }
    }
}

/// A rejection together with the wait until the next possible admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,

    /// Never negative
    pub retry_after: Duration,
}

impl Rejection {
    fn new(reason: RejectReason, retry_after: Duration) -> Self {
        Self {
            reason,
            retry_after: retry_after.max(Duration::zero()),
        }
    }

    /// Same rejection with `extra` added to the wait
    pub fn delayed_by(self, extra: Duration) -> Self {
        Self::new(self.reason, self.retry_after + extra)
    }

    /// Wait in whole seconds, rounded up so that retrying after this many
    /// seconds is never early
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.retry_after)
    }

    /// User-facing message
    pub fn message(&self) -> String {
        let wait = format_wait(self.retry_after_secs());
        match self.reason {
            RejectReason::QuotaExceeded => format!(
                "You have reached your daily message limit. Please, try again in {}.",
                wait
            ),
            RejectReason::TooSoon => format!("Please, try again in {}.", wait),
        }
    }
}

/// Result of evaluating a policy against a history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject(Rejection),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Decide whether one more dispatch may happen at `now`
///
/// `records` must be sorted by `sent_at`. Records at or before
/// `now - window` are ignored, so callers may pass a superset.
pub fn evaluate(policy: &QuotaPolicy, records: &[DispatchRecord], now: DateTime<Utc>) -> Decision {
    let window_start = now - policy.window();
    let start = records.partition_point(|r| r.sent_at <= window_start);
    let in_window = &records[start..];

    let Some(latest) = in_window.last().map(|r| r.sent_at) else {
        return Decision::Admit;
    };

    let cooldown_wait = latest + policy.cooldown() - now;
    let max = (policy.max_per_window as usize).max(1);

    if in_window.len() >= max {
        // The slot frees when the record `len - max` positions from the
        // oldest ages out; with exactly `max` records that is the oldest.
        let freeing = in_window[in_window.len() - max].sent_at;
        let quota_wait = freeing + policy.window() - now;
        // When the latest record is younger than the cooldown, a slot can
        // free up before the cooldown has run out.
        return Decision::Reject(Rejection::new(
            RejectReason::QuotaExceeded,
            quota_wait.max(cooldown_wait),
        ));
    }

    if now - latest < policy.cooldown() {
        return Decision::Reject(Rejection::new(RejectReason::TooSoon, cooldown_wait));
    }

    Decision::Admit
}

/// Snapshot of a recipient's quota position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub recipient: Recipient,

    /// Dispatches counted in the current window
    pub sent_in_window: u32,

    /// Dispatches left before the quota is exhausted
    pub remaining: u32,

    pub max_per_window: u32,

    /// Earliest instant a new request would be admitted
    pub next_allowed_at: DateTime<Utc>,

    /// Oldest dispatch still inside the window
    pub oldest_in_window: Option<DateTime<Utc>>,
}

impl QuotaUsage {
    /// Compute usage from a sorted history
    pub fn compute(
        recipient: Recipient,
        policy: &QuotaPolicy,
        records: &[DispatchRecord],
        now: DateTime<Utc>,
    ) -> Self {
        let window_start = now - policy.window();
        let start = records.partition_point(|r| r.sent_at <= window_start);
        let in_window = &records[start..];
        let sent = u32::try_from(in_window.len()).unwrap_or(u32::MAX);

        let next_allowed_at = match evaluate(policy, records, now) {
            Decision::Admit => now,
            Decision::Reject(rejection) => now + rejection.retry_after,
        };

        Self {
            recipient,
            sent_in_window: sent,
            remaining: policy.max_per_window.saturating_sub(sent),
            max_per_window: policy.max_per_window,
            next_allowed_at,
            oldest_in_window: in_window.first().map(|r| r.sent_at),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let nanos = d.num_nanoseconds().unwrap_or(i64::MAX).max(0) as u64;
    nanos.div_ceil(1_000_000_000)
}

fn format_wait(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("{} {}", n, unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };

    match (hours, minutes, seconds) {
        (0, 0, s) => plural(s, "second"),
        (0, m, 0) => plural(m, "minute"),
        (0, m, s) => format!("{} {}", plural(m, "minute"), plural(s, "second")),
        (h, 0, _) => plural(h, "hour"),
        (h, m, _) => format!("{} {}", plural(h, "hour"), plural(m, "minute")),
    }
}
