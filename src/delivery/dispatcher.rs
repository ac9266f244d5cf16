// Delivery dispatcher - hands codes from the admission path to the channel
//
// Manages:
// - A bounded queue; enqueueing never waits
// - One background task per message, retrying with backoff
// - Dead letter queue for messages that exhaust their retries
// - Counters for monitoring

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::dead_letter::{DeadLetterEntry, DeadLetterQueue, DeadLetterStats};
use super::retry::{next_delay, RetryConfig, RetryDecision};
use super::{CodeMessage, DeliveryChannel, DeliveryError};
use crate::clock::Clock;
use crate::metrics;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Snapshot of delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Messages accepted onto the queue
    pub enqueued: u64,
    /// Messages refused because the queue was full or closed
    pub dropped: u64,
    pub delivered: u64,
    /// Individual attempts that failed (a message may fail several times)
    pub failed_attempts: u64,
    pub dead_lettered: u64,
}

struct Worker {
    channel: Arc<dyn DeliveryChannel>,
    retry: RetryConfig,
    dead_letters: Arc<RwLock<DeadLetterQueue>>,
    counters: Arc<Counters>,
    clock: Arc<dyn Clock>,
}

/// Handle for enqueueing deliveries
///
/// Cloning is cheap; the worker stops once every handle is dropped and all
/// in-flight messages have finished.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    tx: mpsc::Sender<CodeMessage>,
    dead_letters: Arc<RwLock<DeadLetterQueue>>,
    counters: Arc<Counters>,
    channel_name: &'static str,
}

impl std::fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("channel", &self.channel_name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl DeliveryDispatcher {
    /// Start the background worker on the current Tokio runtime
    pub fn spawn(
        channel: Arc<dyn DeliveryChannel>,
        queue_capacity: usize,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let dead_letters = Arc::new(RwLock::new(DeadLetterQueue::new()));
        let counters = Arc::new(Counters::default());
        let channel_name = channel.name();

        let worker = Arc::new(Worker {
            channel,
            retry,
            dead_letters: dead_letters.clone(),
            counters: counters.clone(),
            clock,
        });

        info!("Starting delivery worker for {} channel", channel_name);
        let handle = tokio::spawn(run(rx, worker));

        (
            Self {
                tx,
                dead_letters,
                counters,
                channel_name,
            },
            handle,
        )
    }

    /// Queue a message without waiting
    pub fn enqueue(&self, message: CodeMessage) -> Result<(), DeliveryError> {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueClosed)
            }
        }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel_name
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    pub async fn dead_letter_stats(&self) -> DeadLetterStats {
        self.dead_letters.read().await.stats()
    }

    pub async fn pending_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.read().await.pending_review()
    }

    /// Drop dead letters past their retention
    pub async fn archive_old_dead_letters(&self) -> usize {
        self.dead_letters
            .write()
            .await
            .archive_old_entries(chrono::Utc::now())
    }
}

async fn run(mut rx: mpsc::Receiver<CodeMessage>, worker: Arc<Worker>) {
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(message) => {
                    let worker = worker.clone();
                    inflight.spawn(async move { worker.deliver_with_retry(message).await });
                }
                None => break,
            },
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
        }
    }

    while inflight.join_next().await.is_some() {}
    debug!("Delivery worker stopped");
}

impl Worker {
    async fn deliver_with_retry(&self, message: CodeMessage) {
        let mut attempt = 0;

        loop {
            if attempt > 0 && self.clock.now() > message.expires_at {
                self.dead_letter(&message, attempt, "code expired before delivery".to_string())
                    .await;
                return;
            }

            debug!(
                "Delivery attempt {} for message {} via {}",
                attempt + 1,
                message.id,
                self.channel.name()
            );

            let err = match self.channel.deliver(&message, attempt).await {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    metrics::DELIVERY_ATTEMPTS_TOTAL
                        .with_label_values(&["delivered"])
                        .inc();
                    info!(
                        recipient = %message.recipient,
                        message_id = %message.id,
                        "Verification code delivered"
                    );
                    return;
                }
                Err(err) => err,
            };

            self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
            metrics::DELIVERY_ATTEMPTS_TOTAL
                .with_label_values(&["failed"])
                .inc();

            let decision = if err.is_retryable() {
                next_delay(attempt, &self.retry)
            } else {
                RetryDecision::GiveUp
            };

            match decision {
                RetryDecision::Retry(delay_ms) => {
                    attempt += 1;
                    debug!(
                        "Retrying message {} in {} ms after: {}",
                        message.id, delay_ms, err
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
                RetryDecision::GiveUp => {
                    self.dead_letter(&message, attempt + 1, err.to_string()).await;
                    return;
                }
            }
        }
    }

    async fn dead_letter(&self, message: &CodeMessage, attempts: u32, error: String) {
        warn!(
            recipient = %message.recipient,
            message_id = %message.id,
            attempts,
            error = %error,
            "Giving up on verification code delivery"
        );

        let entry = DeadLetterEntry::new(message, attempts, error);
        let dlq_id = self.dead_letters.write().await.add(entry);
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        metrics::DELIVERIES_DEAD_LETTERED_TOTAL.inc();

        debug!("Message {} moved to dead letter queue: {}", message.id, dlq_id);
    }
}
