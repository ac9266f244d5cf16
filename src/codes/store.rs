//! Code Store
//!
//! Outstanding and historical verification codes, per recipient.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::code::VerificationCode;
use crate::error::StoreError;
use crate::recipient::Recipient;

/// Storage for verification codes
#[async_trait]
pub trait CodeStore: Send + Sync + std::fmt::Debug {
    /// Persist a newly issued code
    async fn insert(&self, code: VerificationCode) -> Result<(), StoreError>;

    /// Remove a code by id; used only to roll back a failed admission
    async fn remove(&self, recipient: &Recipient, id: Uuid) -> Result<bool, StoreError>;

    /// Most recent code for `recipient` whose value equals `code`, that is
    /// unverified and not older than `validity` at `now`
    async fn find_valid(
        &self,
        recipient: &Recipient,
        code: &str,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Option<VerificationCode>, StoreError>;

    /// Flip the verified flag; `Ok(false)` if it was already set
    async fn mark_verified(&self, recipient: &Recipient, id: Uuid) -> Result<bool, StoreError>;

    /// Every code issued to `recipient`, oldest first
    async fn history(&self, recipient: &Recipient) -> Result<Vec<VerificationCode>, StoreError>;

    /// Delete codes issued before `cutoff`; returns how many were removed
    async fn purge_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory code store
#[derive(Debug, Clone, Default)]
pub struct MemoryCodeStore {
    /// Per-recipient codes, ascending by `issued_at`
    codes: Arc<RwLock<HashMap<Recipient, Vec<VerificationCode>>>>,
}

impl MemoryCodeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of codes held
    pub async fn len(&self) -> usize {
        let codes = self.codes.read().await;
        codes.values().map(Vec::len).sum()
    }

    /// Whether the store holds no codes
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn insert(&self, code: VerificationCode) -> Result<(), StoreError> {
        let mut codes = self.codes.write().await;
        let history = codes.entry(code.recipient.clone()).or_default();
        let at = history.partition_point(|c| c.issued_at <= code.issued_at);
        history.insert(at, code);
        Ok(())
    }

    async fn remove(&self, recipient: &Recipient, id: Uuid) -> Result<bool, StoreError> {
        let mut codes = self.codes.write().await;
        let Some(history) = codes.get_mut(recipient) else {
            return Ok(false);
        };

        let before = history.len();
        history.retain(|c| c.id != id);
        let removed = history.len() != before;

        if history.is_empty() {
            codes.remove(recipient);
        }
        Ok(removed)
    }

    async fn find_valid(
        &self,
        recipient: &Recipient,
        code: &str,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let codes = self.codes.read().await;
        let Some(history) = codes.get(recipient) else {
            return Ok(None);
        };

        Ok(history
            .iter()
            .rev()
            .find(|c| c.code == code && c.is_valid(now, validity))
            .cloned())
    }

    async fn mark_verified(&self, recipient: &Recipient, id: Uuid) -> Result<bool, StoreError> {
        let mut codes = self.codes.write().await;
        let entry = codes
            .get_mut(recipient)
            .and_then(|history| history.iter_mut().find(|c| c.id == id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if entry.verified {
            return Ok(false);
        }
        entry.verified = true;
        Ok(true)
    }

    async fn history(&self, recipient: &Recipient) -> Result<Vec<VerificationCode>, StoreError> {
        let codes = self.codes.read().await;
        Ok(codes.get(recipient).cloned().unwrap_or_default())
    }

    async fn purge_issued_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut codes = self.codes.write().await;
        let mut removed = 0;

        codes.retain(|_, history| {
            let stale = history.partition_point(|c| c.issued_at < cutoff);
            history.drain(..stale);
            removed += stale;
            !history.is_empty()
        });

        Ok(removed)
    }
}
