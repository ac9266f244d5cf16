//! Verification Codes
//!
//! Code generation, the [`VerificationCode`] entity and the [`CodeStore`]
//! that holds outstanding and historical codes per recipient.

pub mod code;
pub mod store;

pub use code::{CodeAlphabet, CodeConfig, VerificationCode};
pub use store::{CodeStore, MemoryCodeStore};
