//! # arena-core
//!
//! Foundation types shared by the arena coordination server.
//!
//! - **Branded IDs**: `UserId`, `ConnectionId`, `LobbyId`, `ConversationId`,
//!   `MatchId` and friends as newtypes for type safety
//! - **Records**: lobby, match and chat message shapes
//! - **Events**: [`events::ArenaEvent`] and the `MatchStartEvent` payload
//! - **Errors**: [`errors::ArenaError`] with stable wire codes
//! - **Store**: the [`store::ArenaStore`] boundary and an in-memory implementation
//! - **Logging**: subscriber setup and test capture

#![deny(unsafe_code)]

pub mod chat;
pub mod errors;
pub mod events;
pub mod ids;
pub mod lobby;
pub mod logging;
pub mod store;
