//! Verification Code Issuance
//!
//! Entry point for callers: [`IssuanceService::request_code`] admits or
//! rejects a request under the current [`QuotaPolicy`](crate::rate_limit::QuotaPolicy),
//! and [`IssuanceService::verify_code`] consumes an issued code.
//!
//! Admission is serialized per recipient with an in-process lock, which
//! assumes a single service instance owns the ledger.

pub mod outcome;
pub mod service;

// Property-based tests module
#[cfg(test)]
mod proptests;

pub use outcome::{Admission, AdmissionResponse, Outcome};
pub use service::IssuanceService;
