//! Error types for Strata
//!
//! Format errors come from the on-disk codecs and are split out so callers
//! can tell "never formatted" apart from "formatted by someone else".
//! Everything else is an invariant or transition failure.

use thiserror::Error;

/// Common result type for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised while decoding an on-disk record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The magic number does not belong to any registered archive type.
    #[error("unrecognized format: magic {magic:#018x}")]
    UnrecognizedFormat { magic: u64 },

    #[error("archive type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("corrupt metadata length {length} (max {max})")]
    CorruptLength { length: i64, max: usize },

    #[error("buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("bitmap page count {found} exceeds configured maximum {max}")]
    PageCountExceeded { found: u32, max: u32 },

    #[error("header checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
}

impl FormatError {
    /// An unrecognized magic means the device was never formatted; callers
    /// proceed to initialize it. Every other format error is fatal to the read.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnrecognizedFormat { .. })
    }
}

/// Common error type for Strata
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("index {index} out of range for {len} bits")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: i64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an invalid membership error
    pub fn invalid_membership(msg: impl Into<String>) -> Self {
        Self::InvalidMembership(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid transition error from any two displayable states
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Check if this error only means "not formatted yet"
    #[must_use]
    pub fn is_unformatted(&self) -> bool {
        matches!(self, Self::Format(f) if f.is_recoverable())
    }

    /// Check if this error stems from a broken invariant rather than bad input
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::InvalidMembership(_) | Self::IllegalState(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_format_is_recoverable() {
        let err: Error = FormatError::UnrecognizedFormat { magic: 0xdead }.into();
        assert!(err.is_unformatted());
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn test_other_format_errors_are_fatal() {
        let mismatch = FormatError::TypeMismatch {
            expected: "RawDisk",
            found: "UnsettledDisk",
        };
        assert!(!mismatch.is_recoverable());
        assert!(!FormatError::CorruptLength { length: -1, max: 10 }.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OutOfRange { index: 9, len: 8 };
        assert_eq!(err.to_string(), "index 9 out of range for 8 bits");
        assert!(err.is_invariant_violation());

        let err = Error::invalid_transition("Good", "Ejected");
        assert_eq!(err.to_string(), "invalid transition from Good to Ejected");
    }
}
