//! Rate Limiting Module
//!
//! Per-recipient dispatch quotas: a rolling window cap plus a minimum
//! cooldown between consecutive sends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Issuance Service                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ QuotaPolicy │  │ admission:: │  │ Recipient   │         │
//! │  │             │  │ evaluate    │  │ Locks       │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        Dispatch Ledger (append-only, time-ordered)   │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod ledger;
pub mod locks;
pub mod policy;

pub use admission::{evaluate, Decision, QuotaUsage, RejectReason, Rejection};
pub use ledger::{DispatchLedger, DispatchRecord, MemoryLedger};
pub use locks::{RecipientGuard, RecipientLocks};
pub use policy::{PolicyError, QuotaPolicy};
