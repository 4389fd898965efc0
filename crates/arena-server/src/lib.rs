//! # arena-server
//!
//! Real-time coordination for lobbies, match start and chat.
//!
//! - `WebSocket` gateway: authenticated connections, heartbeat, RPC dispatch
//! - Lobby membership: connection sets per lobby, host tracking, match phase
//! - Match start: host-only, persisted before the synchronized start broadcast
//! - Conversations: participant-checked join and send
//! - HTTP endpoints: health, Prometheus metrics, live lobbies, start and notify
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod claims;
pub mod config;
pub mod conversation;
pub mod group;
pub mod health;
pub mod hub;
pub mod lobby;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod websocket;
