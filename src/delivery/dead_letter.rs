// Dead letter queue for undeliverable codes
//
// Holds messages that exhausted their retries so an operator can see which
// recipients never received a code. Entries never affect quota or code state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::CodeMessage;
use crate::recipient::Recipient;

/// Default retention before an entry is archived (7 days)
pub const DEFAULT_RETENTION_HOURS: u32 = 168;

/// Review state of a dead letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    AwaitingReview,
    Reviewed,
    Resolved,
}

/// A delivery that was given up on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique ID for this entry
    pub id: String,
    /// Delivery message id
    pub message_id: Uuid,
    /// Code the message carried
    pub code_id: Uuid,
    pub recipient: Recipient,
    /// Total delivery attempts
    pub attempt_count: u32,
    /// When the entry was created
    pub timestamp: DateTime<Utc>,
    pub last_error: String,
    pub status: DeadLetterStatus,
    /// Optional notes from reviewer
    pub notes: Option<String>,
    /// Hours to retain before archiving
    pub retention_hours: u32,
}

impl DeadLetterEntry {
    /// Create an entry from a failed message
    pub fn new(message: &CodeMessage, attempt_count: u32, last_error: String) -> Self {
        Self {
            id: format!("dlq-{}", Uuid::new_v4()),
            message_id: message.id,
            code_id: message.code_id,
            recipient: message.recipient.clone(),
            attempt_count,
            timestamp: Utc::now(),
            last_error,
            status: DeadLetterStatus::AwaitingReview,
            notes: None,
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }

    pub fn mark_reviewed(&mut self, notes: String) {
        self.status = DeadLetterStatus::Reviewed;
        self.notes = Some(notes);
    }

    pub fn mark_resolved(&mut self) {
        self.status = DeadLetterStatus::Resolved;
    }

    /// Whether the entry outlived its retention at `now`
    pub fn should_archive(&self, now: DateTime<Utc>) -> bool {
        let age_hours = (now - self.timestamp).num_hours();
        age_hours >= i64::from(self.retention_hours)
    }
}

/// Dead letter queue
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue {
    entries: HashMap<String, DeadLetterEntry>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; returns its id
    pub fn add(&mut self, entry: DeadLetterEntry) -> String {
        let id = entry.id.clone();
        self.entries.insert(id.clone(), entry);
        id
    }

    pub fn get(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries.get(id).cloned()
    }

    /// Replace an existing entry; `false` if the id is unknown
    pub fn update(&mut self, entry: DeadLetterEntry) -> bool {
        match self.entries.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    /// Entries still awaiting review, oldest first
    pub fn pending_review(&self) -> Vec<DeadLetterEntry> {
        let mut pending: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.status == DeadLetterStatus::AwaitingReview)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.timestamp);
        pending
    }

    /// Entries for one recipient
    pub fn for_recipient(&self, recipient: &Recipient) -> Vec<DeadLetterEntry> {
        self.entries
            .values()
            .filter(|e| &e.recipient == recipient)
            .cloned()
            .collect()
    }

    /// Drop entries past their retention; returns how many were removed
    pub fn archive_old_entries(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.should_archive(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> DeadLetterStats {
        let count = |status| self.entries.values().filter(|e| e.status == status).count();

        DeadLetterStats {
            total: self.entries.len(),
            awaiting_review: count(DeadLetterStatus::AwaitingReview),
            reviewed: count(DeadLetterStatus::Reviewed),
            resolved: count(DeadLetterStatus::Resolved),
        }
    }
}

/// Dead letter statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub awaiting_review: usize,
    pub reviewed: usize,
    pub resolved: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(to: &str) -> CodeMessage {
        CodeMessage::new(
            Uuid::new_v4(),
            Recipient::parse(to).unwrap(),
            "123456".to_string(),
            Utc::now(),
            Utc::now() + Duration::minutes(3),
        )
    }

    #[test]
    fn test_create_entry() {
        let msg = message("a@x.com");
        let entry = DeadLetterEntry::new(&msg, 3, "Connection timeout".to_string());

        assert_eq!(entry.message_id, msg.id);
        assert_eq!(entry.code_id, msg.code_id);
        assert_eq!(entry.attempt_count, 3);
        assert_eq!(entry.status, DeadLetterStatus::AwaitingReview);
        assert!(entry.id.starts_with("dlq-"));
    }

    #[test]
    fn test_add_and_get() {
        let mut dlq = DeadLetterQueue::new();
        let id = dlq.add(DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string()));

        let retrieved = dlq.get(&id).unwrap();
        assert_eq!(retrieved.recipient.to_string(), "a@x.com");
    }

    #[test]
    fn test_pending_review() {
        let mut dlq = DeadLetterQueue::new();
        dlq.add(DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string()));

        let mut reviewed = DeadLetterEntry::new(&message("b@x.com"), 2, "Error".to_string());
        reviewed.mark_reviewed("bounced, address typo".to_string());
        dlq.add(reviewed);

        let pending = dlq.pending_review();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recipient.to_string(), "a@x.com");
    }

    #[test]
    fn test_update_entry() {
        let mut dlq = DeadLetterQueue::new();
        let mut entry = DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string());
        dlq.add(entry.clone());

        entry.mark_resolved();
        assert!(dlq.update(entry.clone()));
        assert_eq!(dlq.get(&entry.id).unwrap().status, DeadLetterStatus::Resolved);

        let stranger = DeadLetterEntry::new(&message("c@x.com"), 1, "Error".to_string());
        assert!(!dlq.update(stranger));
    }

    #[test]
    fn test_for_recipient() {
        let mut dlq = DeadLetterQueue::new();
        for _ in 0..3 {
            dlq.add(DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string()));
        }
        dlq.add(DeadLetterEntry::new(&message("b@x.com"), 1, "Error".to_string()));

        let who = Recipient::parse("a@x.com").unwrap();
        assert_eq!(dlq.for_recipient(&who).len(), 3);
    }

    #[test]
    fn test_archive_old_entries() {
        let mut dlq = DeadLetterQueue::new();
        dlq.add(DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string()));

        assert_eq!(dlq.archive_old_entries(Utc::now()), 0);
        let later = Utc::now() + Duration::hours(i64::from(DEFAULT_RETENTION_HOURS) + 1);
        assert_eq!(dlq.archive_old_entries(later), 1);
        assert_eq!(dlq.stats().total, 0);
    }

    #[test]
    fn test_stats() {
        let mut dlq = DeadLetterQueue::new();
        dlq.add(DeadLetterEntry::new(&message("a@x.com"), 2, "Error".to_string()));

        let mut resolved = DeadLetterEntry::new(&message("b@x.com"), 2, "Error".to_string());
        resolved.mark_resolved();
        dlq.add(resolved);

        let stats = dlq.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.awaiting_review, 1);
        assert_eq!(stats.resolved, 1);
    }
}
