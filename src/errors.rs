//! Typed error surface for the trading core.
//!
//! Every fallible Core operation returns [`CoreError`]. Call sites that only
//! need to thread a human-readable message (startup safety checks, config
//! validation) wrap it with `anyhow::Context` instead of matching variants.

use thiserror::Error;

/// Coarse classification an [`crate::exchange::ExchangePort`] error is sorted
/// into on the way in. Drives retry policy in the executor (§4.4/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessFatalKind {
    InsufficientMargin,
    InvalidSymbol,
    OrderNotFound,
    OrderAlreadyFilled,
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Network timeout, 5xx, or other transient exchange I/O failure.
    /// Retriable by the executor's backoff policy.
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// HTTP 429 or an exchange-native rate-limit rejection. Treated as
    /// transient but callers should additionally honor any `retry_after`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Not retried. Surfaced immediately to the caller.
    #[error("business-fatal error ({kind:?}): {message}")]
    BusinessFatal {
        kind: BusinessFatalKind,
        message: String,
    },

    /// A slot or inventory invariant failed to hold. Never auto-repaired;
    /// logged at `tracing::error!` and the offending mutation is rejected.
    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },

    /// Shutdown was requested while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether the executor's retry loop should attempt this operation
    /// again (§4.4 "Non-retriable classes").
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::RateLimited { .. })
    }
}

/// Errors that abort startup before any order is placed (§6 "Exit codes").
/// The external CLI collaborator maps these to non-zero process exit codes;
/// the Core only needs to produce them.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("safety check failed: {0}")]
    SafetyCheck(String),
}
