//! Error taxonomy for the security subsystem.
//!
//! Every kind fails closed. Read paths absorb `DecryptionFailure` and
//! `CorruptLedger` locally (absent / empty) and only write paths let
//! `StorageUnavailable` reach the caller.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SecurityError>;

#[derive(Error, Debug)]
pub enum SecurityError {
    /// No writable location for the device key or secure data.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Ciphertext did not authenticate under the device key.
    /// Details are intentionally vague.
    #[error("decryption failed")]
    DecryptionFailure,

    /// Persisted audit ledger could not be parsed.
    #[error("audit ledger corrupted: {0}")]
    CorruptLedger(String),

    /// Login attempted while the device is locked out.
    #[error("login locked out for another {} minute(s)", minutes_ceil(.remaining))]
    LockoutViolation { remaining: Duration },

    /// Privileged mutation attempted without the gating permission.
    #[error("unauthorized: missing permission `{permission}`")]
    UnauthorizedMutation { permission: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(#[from] std::io::Error),
}

/// Whole minutes, rounded up. Used for lockout notices.
pub fn minutes_ceil(d: &Duration) -> u64 {
    d.as_secs().div_ceil(60)
}
