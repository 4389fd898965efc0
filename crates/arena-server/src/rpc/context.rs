//! Per-connection context handed to every RPC handler.

use std::sync::Arc;
use std::time::Instant;

use crate::hub::ArenaHub;
use crate::websocket::connection::ClientConnection;

/// Shared hub plus the connection the request arrived on.
pub struct RpcContext {
    /// Coordination state.
    pub hub: Arc<ArenaHub>,
    /// Calling connection; its user id is the caller identity.
    pub connection: Arc<ClientConnection>,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}
