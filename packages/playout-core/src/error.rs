//! Centralized error taxonomy for the playout engine.
//!
//! Mirrors the host project's convention of a single `thiserror`-derived enum
//! with a `kind()` accessor returning a machine-readable error code, rather
//! than a profusion of ad-hoc error types per module.

use thiserror::Error;

/// Error type returned by [`crate::engine::PlayoutEngine`] domain operations.
///
/// Transient and fatal *decode* errors never reach this type directly — the
/// producer absorbs transient errors locally (backoff + retry) and a fatal
/// decode error only surfaces here, as [`EngineError::SlotErrored`], on the
/// next lifecycle call that touches the affected channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("channel {0} already exists")]
    AlreadyExists(i32),

    #[error("channel {0} not found")]
    NotFound(i32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("channel {0} is not in a state that permits this operation")]
    BadState(i32),

    #[error("channel {0} shadow slot is not past the ready threshold")]
    NotReady(i32),

    #[error("operation on channel {0} timed out")]
    Timeout(i32),

    #[error("channel {0} slot reported a fatal decode error: {1}")]
    SlotErrored(i32, String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Machine-readable error code, for API responses and telemetry labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::BadState(_) => "bad_state",
            Self::NotReady(_) => "not_ready",
            Self::Timeout(_) => "timeout",
            Self::SlotErrored(_, _) => "slot_errored",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias for engine-wide fallible operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_reports_expected_kind() {
        let err = EngineError::NotFound(7);
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "channel 7 not found");
    }

    #[test]
    fn not_ready_reports_expected_kind() {
        let err = EngineError::NotReady(1);
        assert_eq!(err.kind(), "not_ready");
    }
}
