//! Codeguard Library
//!
//! Rate-limited issuance of one-time verification codes: per-recipient
//! rolling quotas and cooldowns, single-use time-boxed codes, and
//! asynchronous delivery that never blocks the admission decision.

pub mod clock;
pub mod codes;
pub mod config;
pub mod delivery;
pub mod error;
pub mod issuance;
pub mod metrics;
pub mod rate_limit;
pub mod recipient;
pub mod server;

pub use error::{IssuanceError, StoreError};
pub use issuance::{AdmissionResponse, IssuanceService, Outcome};
pub use rate_limit::QuotaPolicy;
pub use recipient::Recipient;
