//! RPC error codes and error type.

use arena_core::errors::{ArenaError, ErrorCode};

use crate::rpc::types::RpcErrorBody;

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = ErrorCode::InvalidParams.as_str();
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = ErrorCode::InternalError.as_str();
/// Generic not-found.
pub const NOT_FOUND: &str = ErrorCode::NotFound.as_str();
/// Caller is not the host or not a participant.
pub const FORBIDDEN: &str = ErrorCode::Forbidden.as_str();
/// Operation not valid in the current lobby state.
pub const INVALID_STATE: &str = ErrorCode::InvalidState.as_str();
/// Durable store failure; the client may retry.
pub const STORAGE_ERROR: &str = ErrorCode::StorageError.as_str();
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Frame could not be parsed as a request.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
/// Handler did not finish within the dispatch timeout.
pub const TIMEOUT: &str = "TIMEOUT";
/// No caller identity on an HTTP request.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";

/// RPC error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Human-readable message.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain error with an arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::NotFound { .. } => NOT_FOUND,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => code,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code().to_owned(),
            message: super::validation::sanitize_error_message(self),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

impl From<ArenaError> for RpcError {
    fn from(err: ArenaError) -> Self {
        match err.code() {
            ErrorCode::InvalidParams => Self::InvalidParams {
                message: err.to_string(),
            },
            ErrorCode::NotFound => Self::NotFound {
                message: err.to_string(),
            },
            ErrorCode::InternalError => Self::Internal {
                message: err.to_string(),
            },
            code @ (ErrorCode::Forbidden | ErrorCode::InvalidState | ErrorCode::StorageError) => {
                Self::Custom {
                    code: code.as_str().to_owned(),
                    message: err.to_string(),
                    details: err
                        .is_retryable()
                        .then(|| serde_json::json!({ "retryable": true })),
                }
            }
        }
    }
}
