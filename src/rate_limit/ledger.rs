//! Dispatch Ledger
//!
//! Append-only record of admitted dispatches, indexed by recipient and kept
//! in `sent_at` order so "everything since T" is a binary search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::recipient::Recipient;

/// One admitted dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Record id
    pub id: Uuid,

    /// Who the code was sent to
    pub recipient: Recipient,

    /// When the admission happened
    pub sent_at: DateTime<Utc>,
}

impl DispatchRecord {
    /// Create a record for an admission at `sent_at`
    pub fn new(recipient: Recipient, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            sent_at,
        }
    }
}

/// Storage for dispatch records
#[async_trait]
pub trait DispatchLedger: Send + Sync + std::fmt::Debug {
    /// Records for `recipient` with `sent_at > since`, oldest first
    async fn records_since(
        &self,
        recipient: &Recipient,
        since: DateTime<Utc>,
    ) -> Result<Vec<DispatchRecord>, StoreError>;

    /// Append a record
    async fn append(&self, record: DispatchRecord) -> Result<(), StoreError>;

    /// Drop records with `sent_at <= cutoff`; returns how many were removed
    async fn prune_through(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    /// Per-recipient records, ascending by `sent_at`
    records: Arc<RwLock<HashMap<Recipient, Vec<DispatchRecord>>>>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records held
    pub async fn len(&self) -> usize {
        let records = self.records.read().await;
        records.values().map(Vec::len).sum()
    }

    /// Whether the ledger holds no records
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DispatchLedger for MemoryLedger {
    async fn records_since(
        &self,
        recipient: &Recipient,
        since: DateTime<Utc>,
    ) -> Result<Vec<DispatchRecord>, StoreError> {
        let records = self.records.read().await;
        let Some(history) = records.get(recipient) else {
            return Ok(Vec::new());
        };

        let start = history.partition_point(|r| r.sent_at <= since);
        Ok(history[start..].to_vec())
    }

    async fn append(&self, record: DispatchRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let history = records.entry(record.recipient.clone()).or_default();

        // Appends are normally in order; keep the index sorted regardless
        let at = history.partition_point(|r| r.sent_at <= record.sent_at);
        history.insert(at, record);
        Ok(())
    }

    async fn prune_through(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let mut removed = 0;

        records.retain(|_, history| {
            let stale = history.partition_point(|r| r.sent_at <= cutoff);
            history.drain(..stale);
            removed += stale;
            !history.is_empty()
        });

        Ok(removed)
    }
}
