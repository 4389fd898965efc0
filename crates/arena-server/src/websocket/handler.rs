//! Inbound frame dispatch: parse text as an `RpcRequest` and route it through
//! the `MethodRegistry`.

use tracing::{debug, instrument, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::errors;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Result of handling one inbound frame.
pub struct HandleResult {
    /// Serialized response to queue on the connection.
    pub response_json: String,
    /// The RPC method that was called (empty if parsing failed).
    pub method: String,
    /// Typed response.
    pub response: RpcResponse,
}

fn encode(response: RpcResponse, method: String) -> HandleResult {
    let response_json = serde_json::to_string(&response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        String::new()
    });
    HandleResult {
        response_json,
        method,
        response,
    }
}

/// Handle an inbound text frame from `ctx.connection`.
#[instrument(skip_all, fields(method, connection_id = %ctx.connection.id))]
pub async fn handle_message(
    message: &str,
    registry: &MethodRegistry,
    ctx: &RpcContext,
) -> HandleResult {
    let request: RpcRequest = match serde_json::from_str(message) {
        Ok(r) => r,
        Err(e) => {
            warn!(len = message.len(), "unparseable frame");
            let resp =
                RpcResponse::error("unknown", errors::PARSE_ERROR, format!("Invalid JSON: {e}"));
            return encode(resp, String::new());
        }
    };

    let method = request.method.clone();
    let _ = tracing::Span::current().record("method", method.as_str());
    debug!(method, id = %request.id, "dispatching RPC");

    let response = registry.dispatch(request, ctx).await;
    encode(response, method)
}
