//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Every fallible operation validates its inputs before touching any state,
//! so an `Err` never leaves a half-applied mutation behind.

use std::collections::TryReserveError;
use thiserror::Error;

/// Main error type for inference operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferError {
    /// Arena or heap exhaustion. Fatal; never retried.
    #[error("Allocation failure: {message}")]
    AllocationFailure { message: String },

    /// Malformed inputs (mismatched lengths, non-monotonic positions,
    /// non-positive rates). Caller bug.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Site, ancestor, node or epoch id outside the valid range
    #[error("Out of range: {what} {index} (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },

    /// Broken invariant (e.g. no ancestor to copy from). Indicates a corrupt
    /// store and must be treated as fatal.
    #[error("Internal consistency failure: {message}")]
    InternalConsistency { message: String },
}

/// Type alias for Results using InferError
pub type Result<T> = std::result::Result<T, InferError>;

impl InferError {
    /// Create an allocation failure
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::AllocationFailure {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(what: &'static str, index: usize, limit: usize) -> Self {
        Self::OutOfRange { what, index, limit }
    }

    /// Create an internal consistency error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency {
            message: message.into(),
        }
    }

    /// True for errors that indicate corrupted state rather than bad input
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure { .. } | Self::InternalConsistency { .. }
        )
    }
}

impl From<TryReserveError> for InferError {
    fn from(err: TryReserveError) -> Self {
        Self::AllocationFailure {
            message: err.to_string(),
        }
    }
}
