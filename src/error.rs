//! Error types for the refresh core.
//!
//! Library code returns these `thiserror` enums; the host layer (`run_server`,
//! config loading, `main`) works in `anyhow::Result` and decides what a failure
//! means for the process.

use std::fmt;
use thiserror::Error;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Stable classification of core failures, used for log fields and for
/// mapping onto protocol status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The randomness source could not supply bytes for a new identifier
    EntropyExhausted,
    /// The value store rejected a read or write
    StoreFailure,
    /// A read had to bootstrap the value and that refresh failed
    UpstreamFailure,
    /// A refresh did not finish within its deadline
    DeadlineExceeded,
}

impl ErrorCode {
    /// Whether the process can keep running after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::EntropyExhausted)
    }

    /// Get the error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::EntropyExhausted => "fatal",
            ErrorCode::StoreFailure => "store_error",
            ErrorCode::UpstreamFailure => "upstream_error",
            ErrorCode::DeadlineExceeded => "timeout",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::EntropyExhausted => write!(f, "entropy_exhausted"),
            ErrorCode::StoreFailure => write!(f, "store_failure"),
            ErrorCode::UpstreamFailure => write!(f, "upstream_failure"),
            ErrorCode::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

// =============================================================================
// COMPONENT ERRORS
// =============================================================================

/// Failure to produce a new value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("entropy source exhausted: {reason}")]
    EntropyExhausted { reason: String },
}

/// Failure reported by a [`ValueStore`](crate::store::ValueStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value store {operation} failed: {reason}")]
pub struct StoreError {
    operation: &'static str,
    reason: String,
}

impl StoreError {
    pub fn read(reason: impl Into<String>) -> Self {
        Self {
            operation: "read",
            reason: reason.into(),
        }
    }

    pub fn write(reason: impl Into<String>) -> Self {
        Self {
            operation: "write",
            reason: reason.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Error surfaced by the refresh service and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error(transparent)]
    EntropyExhausted(#[from] GeneratorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lazy refresh performed by a read failed.
    #[error("no value available: bootstrap refresh failed: {0}")]
    Upstream(#[source] Box<RefreshError>),

    #[error("refresh exceeded its {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },
}

impl RefreshError {
    pub fn upstream(cause: RefreshError) -> Self {
        RefreshError::Upstream(Box::new(cause))
    }

    /// A refresh cut off after `limit`.
    pub fn timeout(limit: std::time::Duration) -> Self {
        RefreshError::Timeout {
            timeout_ms: limit.as_millis() as u64,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RefreshError::EntropyExhausted(_) => ErrorCode::EntropyExhausted,
            RefreshError::Store(_) => ErrorCode::StoreFailure,
            RefreshError::Upstream(_) => ErrorCode::UpstreamFailure,
            RefreshError::Timeout { .. } => ErrorCode::DeadlineExceeded,
        }
    }

    /// True if this error, or the refresh failure it wraps, is unrecoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            RefreshError::Upstream(cause) => cause.is_fatal(),
            other => other.code().is_fatal(),
        }
    }
}
