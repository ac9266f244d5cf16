//! Issuance Service
//!
//! Orchestrates one code request: validate the recipient, take the
//! recipient's lock, evaluate the quota against the ledger, then write the
//! code and its dispatch record and hand the code to delivery.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::outcome::{Admission, Outcome};
use crate::clock::{Clock, SystemClock};
use crate::codes::{CodeConfig, CodeStore, MemoryCodeStore, VerificationCode};
use crate::delivery::{CodeMessage, DeliveryDispatcher};
use crate::error::{IssuanceError, StoreError};
use crate::metrics;
use crate::rate_limit::{
    evaluate, Decision, DispatchLedger, DispatchRecord, MemoryLedger, PolicyError, QuotaPolicy,
    QuotaUsage, RecipientLocks,
};
use crate::recipient::Recipient;

/// Attempts at drawing a code that differs from the recipient's outstanding ones
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Rate-limited verification code issuance
#[derive(Debug, Clone)]
pub struct IssuanceService {
    /// Read at every decision; replaceable at runtime
    policy: Arc<RwLock<QuotaPolicy>>,

    codes: CodeConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn DispatchLedger>,
    code_store: Arc<dyn CodeStore>,
    locks: RecipientLocks,
    dispatcher: DeliveryDispatcher,
}

impl IssuanceService {
    /// Create a service with in-memory storage and the system clock
    pub fn new(policy: QuotaPolicy, dispatcher: DeliveryDispatcher) -> Result<Self, PolicyError> {
        policy.validate()?;

        Ok(Self {
            policy: Arc::new(RwLock::new(policy)),
            codes: CodeConfig::default(),
            clock: Arc::new(SystemClock),
            ledger: Arc::new(MemoryLedger::new()),
            code_store: Arc::new(MemoryCodeStore::new()),
            locks: RecipientLocks::new(),
            dispatcher,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DispatchLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_code_store(mut self, code_store: Arc<dyn CodeStore>) -> Self {
        self.code_store = code_store;
        self
    }

    pub fn with_code_config(mut self, codes: CodeConfig) -> Self {
        self.codes = codes;
        self
    }

    /// Current policy
    pub async fn policy(&self) -> QuotaPolicy {
        *self.policy.read().await
    }

    /// Replace the policy; later decisions use the new values
    pub async fn update_policy(&self, policy: QuotaPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        *self.policy.write().await = policy;
        info!(
            max_per_window = policy.max_per_window,
            cooldown_secs = policy.cooldown_secs,
            window_secs = policy.window_secs,
            "Quota policy updated"
        );
        Ok(())
    }

    pub fn code_config(&self) -> &CodeConfig {
        &self.codes
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher {
        &self.dispatcher
    }

    /// Ask for a new code for `recipient`
    ///
    /// Rejections are `Ok(Outcome::Rejected(..))`. Errors mean no code was
    /// admitted; storage errors are worth retrying.
    pub async fn request_code(&self, recipient: &str) -> Result<Outcome, IssuanceError> {
        let start = Instant::now();

        let recipient = match Recipient::parse(recipient) {
            Ok(recipient) => recipient,
            Err(e) => {
                debug!("Rejecting malformed recipient: {}", e);
                metrics::CODE_REQUESTS_TOTAL
                    .with_label_values(&["invalid_recipient"])
                    .inc();
                return Err(e.into());
            }
        };

        let result = self.admit(&recipient).await;

        metrics::ADMISSION_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
        let label = match &result {
            Ok(Outcome::Admitted(_)) => "admitted",
            Ok(Outcome::Rejected(rejection)) => rejection.reason.as_str(),
            Err(_) => "storage_unavailable",
        };
        metrics::CODE_REQUESTS_TOTAL.with_label_values(&[label]).inc();

        result
    }

    async fn admit(&self, recipient: &Recipient) -> Result<Outcome, IssuanceError> {
        let _guard = self.locks.acquire(recipient).await;
        metrics::TRACKED_RECIPIENTS.set(self.locks.tracked() as i64);

        let policy = self.policy().await;
        let wall = self.clock.now();

        let records = self
            .ledger
            .records_since(recipient, wall - policy.window())
            .await
            .inspect_err(|e| warn!(recipient = %recipient, "Ledger read failed: {}", e))?;

        // A clock stepping backwards must not reorder this recipient's records
        let now = records.last().map_or(wall, |r| r.sent_at.max(wall));

        if let Decision::Reject(rejection) = evaluate(&policy, &records, now) {
            // Callers retry by the real clock, which may lag `now`
            let rejection = rejection.delayed_by(now - wall);
            info!(
                recipient = %recipient,
                reason = rejection.reason.as_str(),
                retry_after_secs = rejection.retry_after_secs(),
                "Code request rejected"
            );
            return Ok(Outcome::Rejected(rejection));
        }

        let value = self.generate_distinct(recipient, now).await?;
        let code = VerificationCode::new(recipient.clone(), value, now);

        self.code_store
            .insert(code.clone())
            .await
            .inspect_err(|e| warn!(recipient = %recipient, "Code insert failed: {}", e))?;

        if let Err(e) = self
            .ledger
            .append(DispatchRecord::new(recipient.clone(), now))
            .await
        {
            warn!(recipient = %recipient, code_id = %code.id, "Ledger append failed: {}", e);
            match self.code_store.remove(recipient, code.id).await {
                Ok(_) => debug!("Rolled back code {}", code.id),
                Err(rollback) => error!(
                    recipient = %recipient,
                    code_id = %code.id,
                    "Failed to roll back code after ledger failure: {}",
                    rollback
                ),
            }
            return Err(e.into());
        }

        metrics::CODES_ISSUED_TOTAL.inc();
        let expires_at = code.expires_at(self.codes.validity());

        let message = CodeMessage::new(
            code.id,
            recipient.clone(),
            code.code.clone(),
            now,
            expires_at,
        );
        if let Err(e) = self.dispatcher.enqueue(message) {
            // Admission stands; the code is valid whether or not it arrives
            warn!(recipient = %recipient, code_id = %code.id, "Delivery handoff failed: {}", e);
        }

        info!(recipient = %recipient, code_id = %code.id, "Verification code issued");

        Ok(Outcome::Admitted(Admission {
            code_id: code.id,
            recipient: recipient.clone(),
            issued_at: now,
            expires_at,
        }))
    }

    /// Draw a code not equal to one the recipient can still use
    async fn generate_distinct(
        &self,
        recipient: &Recipient,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<String, StoreError> {
        let validity = self.codes.validity();
        let mut value = self.codes.generate();

        for _ in 1..MAX_GENERATION_ATTEMPTS {
            if self
                .code_store
                .find_valid(recipient, &value, now, validity)
                .await?
                .is_none()
            {
                break;
            }
            value = self.codes.generate();
        }

        Ok(value)
    }

    /// Look up a valid code without consuming it
    pub async fn find_valid(
        &self,
        recipient: &str,
        code: &str,
    ) -> Result<VerificationCode, IssuanceError> {
        let recipient = Recipient::parse(recipient)?;
        let now = self.clock.now();

        self.code_store
            .find_valid(&recipient, code, now, self.codes.validity())
            .await?
            .ok_or(IssuanceError::CodeNotFound)
    }

    /// Consume a code: it must match, be unverified and unexpired
    ///
    /// A second call with the same code fails with `CodeNotFound`.
    pub async fn verify_code(
        &self,
        recipient: &str,
        code: &str,
    ) -> Result<VerificationCode, IssuanceError> {
        let recipient = Recipient::parse(recipient)?;
        let _guard = self.locks.acquire(&recipient).await;
        let now = self.clock.now();

        let mut found = self
            .code_store
            .find_valid(&recipient, code, now, self.codes.validity())
            .await?
            .ok_or(IssuanceError::CodeNotFound)?;

        match self.code_store.mark_verified(&recipient, found.id).await {
            Ok(true) => {}
            Ok(false) | Err(StoreError::NotFound(_)) => return Err(IssuanceError::CodeNotFound),
            Err(e) => return Err(e.into()),
        }

        metrics::CODES_VERIFIED_TOTAL.inc();
        info!(recipient = %recipient, code_id = %found.id, "Verification code consumed");

        found.verified = true;
        Ok(found)
    }

    /// Quota position of a recipient
    pub async fn usage(&self, recipient: &str) -> Result<QuotaUsage, IssuanceError> {
        let recipient = Recipient::parse(recipient)?;
        let policy = self.policy().await;
        let wall = self.clock.now();

        let records = self
            .ledger
            .records_since(&recipient, wall - policy.window())
            .await?;
        let now = records.last().map_or(wall, |r| r.sent_at.max(wall));

        let mut usage = QuotaUsage::compute(recipient, &policy, &records, now);
        if usage.next_allowed_at == now {
            usage.next_allowed_at = wall;
        }
        Ok(usage)
    }

    /// Delete codes whose validity has elapsed
    pub async fn purge_expired_codes(&self) -> Result<usize, IssuanceError> {
        let cutoff = self.clock.now() - self.codes.validity();
        let removed = self.code_store.purge_issued_before(cutoff).await?;
        if removed > 0 {
            info!("Purged {} expired verification codes", removed);
        }
        Ok(removed)
    }

    /// Delete dispatch records too old to affect any decision
    pub async fn prune_ledger(&self) -> Result<usize, IssuanceError> {
        let policy = self.policy().await;
        let cutoff = self.clock.now() - policy.window();
        let removed = self.ledger.prune_through(cutoff).await?;
        if removed > 0 {
            info!("Pruned {} dispatch records", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::{LogChannel, RetryConfig};
    use crate::rate_limit::RejectReason;
    use chrono::Duration;

    fn service(clock: &ManualClock) -> IssuanceService {
        let (dispatcher, _worker) = DeliveryDispatcher::spawn(
            Arc::new(LogChannel),
            16,
            RetryConfig::no_retry(),
            Arc::new(clock.clone()),
        );
        IssuanceService::new(QuotaPolicy::default(), dispatcher)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_first_request_is_admitted() {
        let clock = ManualClock::default();
        let service = service(&clock);

        let outcome = service.request_code("a@x.com").await.unwrap();
        assert!(outcome.is_admitted());
    }

    #[tokio::test]
    async fn test_invalid_recipient_never_reaches_ledger() {
        let clock = ManualClock::default();
        let service = service(&clock);

        let err = service.request_code("not-an-address").await.unwrap_err();
        assert!(matches!(err, IssuanceError::InvalidRecipient(_)));
        assert_eq!(service.usage("a@x.com").await.unwrap().sent_in_window, 0);
    }

    #[tokio::test]
    async fn test_second_request_too_soon() {
        let clock = ManualClock::default();
        let service = service(&clock);

        service.request_code("a@x.com").await.unwrap();
        clock.advance(Duration::seconds(10));

        let outcome = service.request_code("a@x.com").await.unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.reason, RejectReason::TooSoon);
        assert_eq!(rejection.retry_after_secs(), 170);
    }

    #[tokio::test]
    async fn test_domain_case_shares_quota() {
        let clock = ManualClock::default();
        let service = service(&clock);

        service.request_code("a@x.com").await.unwrap();
        let outcome = service.request_code("a@X.COM").await.unwrap();
        assert!(!outcome.is_admitted());
    }

    #[tokio::test]
    async fn test_verify_consumes_once() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryCodeStore::new());
        let service = service(&clock).with_code_store(store.clone());

        service.request_code("a@x.com").await.unwrap();
        let who = Recipient::parse("a@x.com").unwrap();
        let issued = store.history(&who).await.unwrap().remove(0);

        let verified = service.verify_code("a@x.com", &issued.code).await.unwrap();
        assert!(verified.verified);
        assert_eq!(verified.id, issued.id);

        let again = service.verify_code("a@x.com", &issued.code).await;
        assert!(matches!(again, Err(IssuanceError::CodeNotFound)));
        assert!(service.find_valid("a@x.com", &issued.code).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_code_not_found() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryCodeStore::new());
        let service = service(&clock).with_code_store(store.clone());

        service.request_code("a@x.com").await.unwrap();
        let who = Recipient::parse("a@x.com").unwrap();
        let issued = store.history(&who).await.unwrap().remove(0);

        clock.advance(Duration::seconds(180));
        assert!(service.find_valid("a@x.com", &issued.code).await.is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            service.find_valid("a@x.com", &issued.code).await,
            Err(IssuanceError::CodeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_policy_update_applies_to_next_decision() {
        let clock = ManualClock::default();
        let service = service(&clock);

        service.request_code("a@x.com").await.unwrap();
        clock.advance(Duration::seconds(10));
        assert!(!service.request_code("a@x.com").await.unwrap().is_admitted());

        service
            .update_policy(QuotaPolicy::new(3, 5, 86_400).unwrap())
            .await
            .unwrap();
        assert!(service.request_code("a@x.com").await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_invalid_policy_update_is_refused() {
        let clock = ManualClock::default();
        let service = service(&clock);

        let bad = QuotaPolicy {
            max_per_window: 0,
            ..QuotaPolicy::default()
        };
        assert!(service.update_policy(bad).await.is_err());
        assert_eq!(service.policy().await, QuotaPolicy::default());
    }

    #[tokio::test]
    async fn test_clock_step_back_keeps_records_ordered() {
        let clock = ManualClock::default();
        let service = service(&clock);

        service.request_code("a@x.com").await.unwrap();
        clock.advance(Duration::seconds(-3600));

        let outcome = service.request_code("a@x.com").await.unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.reason, RejectReason::TooSoon);
        assert_eq!(rejection.retry_after_secs(), 3780);

        let usage = service.usage("a@x.com").await.unwrap();
        assert_eq!(
            usage.next_allowed_at,
            clock.now() + Duration::seconds(3780)
        );

        clock.advance(Duration::seconds(3779));
        let early = service.request_code("a@x.com").await.unwrap();
        assert_eq!(early.rejection().unwrap().retry_after_secs(), 1);

        clock.advance(Duration::seconds(1));
        assert!(service.request_code("a@x.com").await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_clock_step_back_quota_wait_follows_real_clock() {
        let clock = ManualClock::default();
        let service = service(&clock);

        for _ in 0..3 {
            assert!(service.request_code("a@x.com").await.unwrap().is_admitted());
            clock.advance(Duration::seconds(200));
        }
        clock.advance(Duration::seconds(-7200));

        let outcome = service.request_code("a@x.com").await.unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.reason, RejectReason::QuotaExceeded);

        clock.advance(Duration::seconds(rejection.retry_after_secs() as i64));
        assert!(service.request_code("a@x.com").await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_housekeeping() {
        let clock = ManualClock::default();
        let service = service(&clock);

        service.request_code("a@x.com").await.unwrap();
        assert_eq!(service.purge_expired_codes().await.unwrap(), 0);
        assert_eq!(service.prune_ledger().await.unwrap(), 0);

        clock.advance(Duration::hours(24));
        assert_eq!(service.purge_expired_codes().await.unwrap(), 1);
        assert_eq!(service.prune_ledger().await.unwrap(), 1);
        assert_eq!(service.usage("a@x.com").await.unwrap().remaining, 3);
    }
}
