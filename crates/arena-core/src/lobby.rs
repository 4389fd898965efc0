//! Durable lobby and match records as seen by the coordination layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LobbyId, MatchId, ProblemId, UserId};

/// Lifecycle status of a lobby.
///
/// Serialized with the exact strings the durable store uses
/// (`"Open"`, `"InProgress"`, `"Closed"`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobbyStatus {
    /// Accepting participants; no match running.
    #[default]
    Open,
    /// A match has been started.
    InProgress,
    /// Closed by the host.
    Closed,
}

impl LobbyStatus {
    /// Wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "InProgress",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lobby as held by the durable store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRecord {
    /// Record id.
    pub lobby_id: LobbyId,
    /// Display name.
    pub name: String,
    /// Host of record. The only authority for host-gated operations.
    pub host: UserId,
    /// Current status.
    pub status: LobbyStatus,
    /// Users who joined the lobby through the REST layer.
    pub participants: Vec<UserId>,
    /// Capacity.
    pub max_players: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl LobbyRecord {
    /// Whether `user` is the host or a recorded participant.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.host == *user || self.participants.iter().any(|p| p == user)
    }
}

/// A match created when the host starts the lobby.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    /// Match id.
    pub match_id: MatchId,
    /// Owning lobby.
    pub lobby_id: LobbyId,
    /// Problems in play.
    pub problem_ids: Vec<ProblemId>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}
