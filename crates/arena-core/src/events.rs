//! Events fanned out to lobby and conversation groups.
//!
//! Each [`ArenaEvent`] carries its wire type string and a camelCase payload.
//! The transport layer wraps the payload in its own envelope; the payload
//! shapes here are compatibility-sensitive and consumed by existing clients.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::ids::{LobbyId, MatchId, ProblemId, UserId};
use crate::lobby::LobbyRecord;

/// The synchronized start signal for a match.
///
/// Built once per accepted start request. `start_at_utc` is computed a single
/// time on the server so every recipient targets the same wall-clock instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStartEvent {
    /// Match record id.
    pub match_id: MatchId,
    /// Problems in play, in the order the host chose.
    pub problem_ids: Vec<ProblemId>,
    /// Instant at which every client begins the match.
    pub start_at_utc: DateTime<Utc>,
    /// Match length in seconds.
    pub duration_sec: u32,
    /// When the server built the event.
    pub sent_at_utc: DateTime<Utc>,
}

impl MatchStartEvent {
    /// Build the event with `start_at_utc = now + buffer_sec`.
    pub fn new(
        match_id: MatchId,
        problem_ids: Vec<ProblemId>,
        duration_sec: u32,
        buffer_sec: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            problem_ids,
            start_at_utc: now + Duration::seconds(i64::from(buffer_sec)),
            duration_sec,
            sent_at_utc: now,
        }
    }
}

/// A user entered or left a lobby's participant set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMemberEvent {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Affected user.
    pub user_id: UserId,
    /// Set when the host removed the user.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub kicked: bool,
}

/// A lobby was closed by its host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyClosedEvent {
    /// Lobby.
    pub lobby_id: LobbyId,
}

/// Everything the server broadcasts to a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ArenaEvent {
    /// A user joined the lobby group.
    #[serde(rename = "lobby.member_joined")]
    MemberJoined(LobbyMemberEvent),
    /// A user left the lobby's participant set.
    #[serde(rename = "lobby.member_left")]
    MemberLeft(LobbyMemberEvent),
    /// The durable lobby record changed.
    #[serde(rename = "lobby.updated")]
    LobbyUpdated(LobbyRecord),
    /// The lobby was closed.
    #[serde(rename = "lobby.closed")]
    LobbyClosed(LobbyClosedEvent),
    /// The host started a match.
    #[serde(rename = "match.started")]
    MatchStarted(MatchStartEvent),
    /// A chat message was accepted.
    #[serde(rename = "conversation.message_created")]
    MessageCreated(ChatMessage),
}

impl ArenaEvent {
    /// Wire type string.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MemberJoined(_) => "lobby.member_joined",
            Self::MemberLeft(_) => "lobby.member_left",
            Self::LobbyUpdated(_) => "lobby.updated",
            Self::LobbyClosed(_) => "lobby.closed",
            Self::MatchStarted(_) => "match.started",
            Self::MessageCreated(_) => "conversation.message_created",
        }
    }

    /// The payload as a JSON value, without the type tag.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::MemberJoined(e) | Self::MemberLeft(e) => serde_json::to_value(e),
            Self::LobbyUpdated(r) => serde_json::to_value(r),
            Self::LobbyClosed(e) => serde_json::to_value(e),
            Self::MatchStarted(e) => serde_json::to_value(e),
            Self::MessageCreated(m) => serde_json::to_value(m),
        }
    }
}
