//! Input validation helpers for RPC parameters.

use super::errors::RpcError;

/// Maximum general string parameter length (8 KB).
pub const MAX_PARAM_LENGTH: usize = 8_192;

/// Byte cap on chat content before the character limit is checked (64 KB).
pub const MAX_CONTENT_BYTES: usize = 65_536;

/// Validate that a string parameter does not exceed `max_len` bytes.
pub fn validate_string_param(value: &str, name: &str, max_len: usize) -> Result<(), RpcError> {
    if value.len() > max_len {
        return Err(RpcError::InvalidParams {
            message: format!(
                "Parameter '{name}' exceeds maximum length ({} > {max_len})",
                value.len()
            ),
        });
    }
    Ok(())
}

/// Sanitize an error message for client consumption.
///
/// Preserves user-facing messages but strips internal details from internal
/// errors.
pub fn sanitize_error_message(err: &RpcError) -> String {
    match err {
        RpcError::InvalidParams { message }
        | RpcError::NotFound { message }
        | RpcError::Custom { message, .. } => message.clone(),
        RpcError::Internal { .. } => "Internal error".to_string(),
    }
}
