//! JSON-RPC style request/response protocol over the WebSocket.

pub mod context;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;
pub mod validation;
