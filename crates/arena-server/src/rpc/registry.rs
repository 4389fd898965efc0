//! Method table for the lobby RPC surface.
//!
//! Methods are named `namespace.action` and registered once at startup.
//! Dispatch bounds every call with a timeout (handlers only ever wait on the
//! durable store), and labels metrics with the registered method name and
//! the wire code of any failure. Unknown method names never become metric
//! labels.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use crate::rpc::context::RpcContext;
use crate::rpc::errors::{self, RpcError};
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Default bound on a single handler call.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

const SLOW_CALL: Duration = Duration::from_secs(2);

/// Metric label for a failed call.
fn error_label(err: &RpcError) -> &'static str {
    match err.code() {
        errors::INVALID_PARAMS => "invalid_params",
        errors::NOT_FOUND => "not_found",
        errors::FORBIDDEN => "forbidden",
        errors::INVALID_STATE => "invalid_state",
        errors::STORAGE_ERROR => "storage_error",
        errors::TIMEOUT => "timeout",
        errors::INTERNAL_ERROR => "internal_error",
        _ => "other",
    }
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: BTreeMap<&'static str, Box<dyn MethodHandler>>,
    timeout: Duration,
}

impl MethodRegistry {
    /// Empty registry with [`HANDLER_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(HANDLER_TIMEOUT)
    }

    /// Empty registry with a custom per-call timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            handlers: BTreeMap::new(),
            timeout,
        }
    }

    /// Register `handler` under `method`, replacing any previous one.
    pub fn register(&mut self, method: &'static str, handler: impl MethodHandler + 'static) {
        debug_assert!(method.contains('.'), "method {method} has no namespace");
        let _ = self.handlers.insert(method, Box::new(handler));
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Whether `method` is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run the handler for `request` and build the response.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        let Some((&name, handler)) = self.handlers.get_key_value(method.as_str()) else {
            counter!(RPC_ERRORS_TOTAL, "method" => "unknown", "error_type" => "method_not_found")
                .increment(1);
            debug!(method, "unknown RPC method");
            return RpcResponse::error(
                &id,
                errors::METHOD_NOT_FOUND,
                format!("Method '{method}' not found"),
            );
        };
        counter!(RPC_REQUESTS_TOTAL, "method" => name).increment(1);

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, handler.handle(params, ctx))
            .await
            .unwrap_or_else(|_| {
                Err(RpcError::Custom {
                    code: errors::TIMEOUT.to_owned(),
                    message: format!("'{name}' did not finish within {:?}", self.timeout),
                    details: Some(serde_json::json!({ "retryable": true })),
                })
            });
        let elapsed = started.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => name).record(elapsed.as_secs_f64());
        if elapsed >= SLOW_CALL {
            warn!(method = name, elapsed_secs = elapsed.as_secs_f64(), "slow RPC call");
        }

        match outcome {
            Ok(result) => RpcResponse::success(&id, result),
            Err(err) => {
                let label = error_label(&err);
                counter!(RPC_ERRORS_TOTAL, "method" => name, "error_type" => label).increment(1);
                match label {
                    "internal_error" | "timeout" => {
                        error!(method = name, error = %err, "RPC failed");
                    }
                    "storage_error" => {
                        warn!(method = name, error = %err, "store failure, client may retry");
                    }
                    _ => debug!(method = name, code = err.code(), "RPC rejected"),
                }
                RpcResponse {
                    id,
                    success: false,
                    result: None,
                    error: Some(err.to_error_body()),
                }
            }
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
