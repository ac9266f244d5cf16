// Admission Performance Benchmarks
//
// Measures the decision path without delivery cost.
//
// Key metrics:
// - Pure window evaluation against histories of growing size
// - Full request_code round trip (lock, ledger read, code write, ledger append)

use chrono::{Duration, Utc};
use codeguard::clock::ManualClock;
use codeguard::delivery::{DeliveryDispatcher, LogChannel, RetryConfig};
use codeguard::issuance::IssuanceService;
use codeguard::rate_limit::{evaluate, DispatchRecord, QuotaPolicy};
use codeguard::recipient::Recipient;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Benchmark: evaluate() against a sorted history
fn bench_evaluate(c: &mut Criterion) {
    let who = Recipient::parse("bench@x.com").unwrap();
    let now = Utc::now();
    let policy = QuotaPolicy::new(1000, 1, 86_400).unwrap();

    let mut group = c.benchmark_group("evaluate");

    for size in [0usize, 3, 100, 1000].iter() {
        let records: Vec<_> = (0..*size)
            .rev()
            .map(|i| DispatchRecord::new(who.clone(), now - Duration::seconds(i as i64 * 60 + 1)))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.iter(|| black_box(evaluate(&policy, black_box(records), now)));
        });
    }

    group.finish();
}

/// Benchmark: request_code for a fresh recipient on every iteration
fn bench_request_code(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let clock = ManualClock::default();

    let service = rt.block_on(async {
        let (dispatcher, _worker) = DeliveryDispatcher::spawn(
            Arc::new(LogChannel),
            1 << 20,
            RetryConfig::no_retry(),
            Arc::new(clock.clone()),
        );
        IssuanceService::new(QuotaPolicy::default(), dispatcher)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    });

    let counter = AtomicU64::new(0);

    c.bench_function("request_code_admitted", |b| {
        b.to_async(&rt).iter(|| async {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let recipient = format!("user{}@x.com", n);
            black_box(service.request_code(&recipient).await.unwrap());
        });
    });

    c.bench_function("request_code_rejected", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(service.request_code("user0@x.com").await.unwrap());
        });
    });
}

criterion_group!(benches, bench_evaluate, bench_request_code);
criterion_main!(benches);
