// Concurrent admission for one recipient must never over- or under-admit

use chrono::{DateTime, Duration, Utc};
use codeguard::clock::{Clock, ManualClock};
use codeguard::delivery::{DeliveryDispatcher, LogChannel, RetryConfig};
use codeguard::issuance::IssuanceService;
use codeguard::rate_limit::{DispatchLedger, MemoryLedger, QuotaPolicy, RejectReason};
use codeguard::recipient::Recipient;
use futures::future::join_all;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Clock that moves forward by `step` on every read
#[derive(Debug)]
struct TickingClock {
    start: DateTime<Utc>,
    step: Duration,
    reads: AtomicI64,
}

impl TickingClock {
    fn new(step: Duration) -> Self {
        Self {
            start: Utc::now(),
            step,
            reads: AtomicI64::new(0),
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) as i32;
        self.start + self.step * n
    }
}

fn service(policy: QuotaPolicy, clock: Arc<dyn Clock>, ledger: Arc<MemoryLedger>) -> IssuanceService {
    let (dispatcher, _worker) = DeliveryDispatcher::spawn(
        Arc::new(LogChannel),
        1024,
        RetryConfig::no_retry(),
        Arc::new(ManualClock::default()),
    );
    IssuanceService::new(policy, dispatcher)
        .unwrap()
        .with_clock(clock)
        .with_ledger(ledger)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_remaining_slots() {
    let policy = QuotaPolicy::new(3, 1, 3600).unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(TickingClock::new(Duration::seconds(2)));
    let service = service(policy, clock, ledger.clone());

    let n = 20;
    let tasks = (0..n).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.request_code("a@x.com").await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let admitted = outcomes.iter().filter(|o| o.is_admitted()).count();
    assert_eq!(admitted, 3);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.rejection())
        .all(|r| r.reason == RejectReason::QuotaExceeded && r.retry_after_secs() > 0));
    assert_eq!(ledger.len().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_at_one_instant_admit_once() {
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::default());
    let service = service(QuotaPolicy::default(), clock, ledger.clone());

    let outcomes = join_all((0..16).map(|_| service.request_code("a@x.com"))).await;

    let admitted = outcomes
        .iter()
        .filter(|o| o.as_ref().unwrap().is_admitted())
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(ledger.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_recipients_are_all_admitted() {
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::default());
    let service = service(QuotaPolicy::default(), clock.clone(), ledger.clone());

    let recipients: Vec<String> = (0..32).map(|i| format!("user{}@x.com", i)).collect();
    let tasks = recipients.iter().cloned().map(|recipient| {
        let service = service.clone();
        tokio::spawn(async move { service.request_code(&recipient).await })
    });

    for joined in join_all(tasks).await {
        assert!(joined.unwrap().unwrap().is_admitted());
    }
    assert_eq!(ledger.len().await, 32);

    let who = Recipient::parse("user7@x.com").unwrap();
    let since = clock.now() - Duration::hours(24);
    assert_eq!(ledger.records_since(&who, since).await.unwrap().len(), 1);
}
