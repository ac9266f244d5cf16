// Prometheus metrics for the codeguard service
//
// Exposes metrics on /metrics HTTP endpoint:
// - Code requests by outcome (counter)
// - Codes issued and verified (counter)
// - Delivery attempts and dead letters (counter)
// - Admission latency (histogram)
// - Tracked recipient locks (gauge)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref CODE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("code_requests_total", "Verification code requests by outcome"),
        &["outcome"]
    ).expect("Failed to create code requests metric");

    pub static ref ADMISSION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "admission_duration_seconds",
            "Time to decide and record a code request"
        )
        .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]),
    ).expect("Failed to create admission duration metric");

    pub static ref TRACKED_RECIPIENTS: IntGauge = IntGauge::new(
        "tracked_recipient_locks",
        "Recipients with a live serialization lock"
    ).expect("Failed to create tracked recipients metric");

    // Code metrics
    pub static ref CODES_ISSUED_TOTAL: IntCounter = IntCounter::new(
        "codes_issued_total",
        "Total number of verification codes issued"
    ).expect("Failed to create codes issued metric");

    pub static ref CODES_VERIFIED_TOTAL: IntCounter = IntCounter::new(
        "codes_verified_total",
        "Total number of verification codes consumed"
    ).expect("Failed to create codes verified metric");

    // Delivery metrics
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("delivery_attempts_total", "Delivery attempts by status"),
        &["status"]
    ).expect("Failed to create delivery attempts metric");

    pub static ref DELIVERIES_DEAD_LETTERED_TOTAL: IntCounter = IntCounter::new(
        "deliveries_dead_lettered_total",
        "Total number of deliveries moved to the dead letter queue"
    ).expect("Failed to create dead letter metric");
}

/// Register every metric with [`REGISTRY`]
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn init() -> prometheus::Result<()> {
    register(Box::new(CODE_REQUESTS_TOTAL.clone()))?;
    register(Box::new(ADMISSION_DURATION_SECONDS.clone()))?;
    register(Box::new(TRACKED_RECIPIENTS.clone()))?;
    register(Box::new(CODES_ISSUED_TOTAL.clone()))?;
    register(Box::new(CODES_VERIFIED_TOTAL.clone()))?;
    register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))?;
    register(Box::new(DELIVERIES_DEAD_LETTERED_TOTAL.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
