//! Error hierarchy for the arena coordination layer.
//!
//! [`ArenaError`] is the single error type returned by every lobby, match and
//! conversation operation. Each variant maps onto one machine-readable
//! [`ErrorCode`] so the RPC and HTTP layers never inspect message strings.
//!
//! Cleanup failures during disconnect reconciliation never become a value of
//! this type; they are logged and swallowed at the call site.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Stable wire codes for [`ArenaError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller is not the host / not a participant.
    Forbidden,
    /// Malformed id, empty content, oversize payload.
    InvalidParams,
    /// Lobby or conversation does not exist.
    NotFound,
    /// Operation not valid in the current lobby/match state.
    InvalidState,
    /// Durable store failure.
    StorageError,
    /// Unexpected internal failure.
    InternalError,
}

impl ErrorCode {
    /// The wire string for this code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::StorageError => "STORAGE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by coordination-layer operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Caller lacks the right to perform the operation.
    #[error("{message}")]
    Authorization {
        /// Human-readable reason.
        message: String,
    },

    /// Request rejected before any mutation.
    #[error("{message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Referenced resource does not exist.
    #[error("{message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// Operation conflicts with the current state.
    #[error("{message}")]
    InvalidState {
        /// Description of the conflict.
        message: String,
    },

    /// Durable store failure, propagated to the caller.
    #[error("storage failure: {0}")]
    TransientStorage(#[from] StoreError),

    /// Failed to encode an outbound payload.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArenaError {
    /// Authorization failure.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Missing resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// State conflict.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authorization { .. } => ErrorCode::Forbidden,
            Self::Validation { .. } => ErrorCode::InvalidParams,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::TransientStorage(_) => ErrorCode::StorageError,
            Self::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the caller may retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }
}

/// Result alias for coordination-layer operations.
pub type Result<T> = std::result::Result<T, ArenaError>;
