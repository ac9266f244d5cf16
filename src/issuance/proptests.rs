//! Property-Based Tests for Admission
//!
//! Random policies and dispatch histories checked against the invariants the
//! issuance path relies on:
//!
//! - **Retry horizon**: a rejection's `retry_after` is exact. One second
//!   early is still rejected; at the rounded-up second the request is admitted
//! - **Monotone wait**: as time advances toward the retry point, the wait
//!   shrinks by exactly the elapsed time
//! - **Quota safety**: a stream of requests filtered through `evaluate` never
//!   holds more than `max_per_window` dispatches in any window, and admitted
//!   dispatches are at least `cooldown` apart
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib issuance::proptests
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::rate_limit::{evaluate, Decision, DispatchRecord, QuotaPolicy};
use crate::recipient::Recipient;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn arb_policy() -> impl Strategy<Value = QuotaPolicy> {
    (1u32..=5, 1u64..=600, 1u64..=48).prop_map(|(max, cooldown, factor)| QuotaPolicy {
        max_per_window: max,
        cooldown_secs: cooldown,
        window_secs: cooldown * factor,
    })
}

fn records_at(now: DateTime<Utc>, ages_secs: &[u64]) -> Vec<DispatchRecord> {
    let who = Recipient::parse("a@x.com").unwrap();
    let mut records: Vec<_> = ages_secs
        .iter()
        .map(|age| DispatchRecord::new(who.clone(), now - Duration::seconds(*age as i64)))
        .collect();
    records.sort_by_key(|r| r.sent_at);
    records
}

proptest! {
    #[test]
    fn prop_retry_after_is_exact(
        policy in arb_policy(),
        ages in prop::collection::vec(0u64..30_000, 0..8),
    ) {
        let now = epoch();
        let records = records_at(now, &ages);

        if let Decision::Reject(rejection) = evaluate(&policy, &records, now) {
            prop_assert!(rejection.retry_after >= Duration::zero());

            let secs = rejection.retry_after_secs() as i64;
            prop_assert!(secs > 0);
            prop_assert!(evaluate(&policy, &records, now + Duration::seconds(secs)).is_admit());
            prop_assert!(!evaluate(&policy, &records, now + Duration::seconds(secs - 1)).is_admit());
        }
    }

    #[test]
    fn prop_wait_shrinks_with_elapsed_time(
        policy in arb_policy(),
        ages in prop::collection::vec(0u64..30_000, 1..8),
        step in 0u64..3600,
    ) {
        let now = epoch();
        let records = records_at(now, &ages);

        if let Decision::Reject(first) = evaluate(&policy, &records, now) {
            let elapsed = Duration::seconds(step as i64);
            prop_assume!(elapsed < first.retry_after);

            // Same instant, same answer
            prop_assert_eq!(evaluate(&policy, &records, now), Decision::Reject(first));

            match evaluate(&policy, &records, now + elapsed) {
                Decision::Reject(later) => {
                    prop_assert_eq!(later.retry_after, first.retry_after - elapsed);
                }
                Decision::Admit => prop_assert!(false, "admitted before retry_after elapsed"),
            }
        }
    }

    #[test]
    fn prop_admitted_stream_respects_policy(
        policy in arb_policy(),
        gaps in prop::collection::vec(0u64..2_000, 1..40),
    ) {
        let who = Recipient::parse("a@x.com").unwrap();
        let mut now = epoch();
        let mut admitted: Vec<DispatchRecord> = Vec::new();

        for gap in gaps {
            now += Duration::seconds(gap as i64);
            if evaluate(&policy, &admitted, now).is_admit() {
                admitted.push(DispatchRecord::new(who.clone(), now));
            }
        }

        for pair in admitted.windows(2) {
            prop_assert!(pair[1].sent_at - pair[0].sent_at >= policy.cooldown());
        }

        for (i, record) in admitted.iter().enumerate() {
            let in_window = admitted[..=i]
                .iter()
                .filter(|r| r.sent_at > record.sent_at - policy.window())
                .count();
            prop_assert!(in_window <= policy.max_per_window as usize);
        }
    }
}
