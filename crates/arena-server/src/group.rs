//! Broadcast group names.

use std::fmt;

use arena_core::ids::{ConversationId, LobbyId};

/// A named set of connections that receive the same events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Everyone watching a lobby.
    Lobby(LobbyId),
    /// Everyone joined to a conversation.
    Conversation(ConversationId),
}

impl Group {
    /// Metric label for the group family.
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Lobby(_) => "lobby",
            Self::Conversation(_) => "conversation",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby(id) => write!(f, "lobby_{id}"),
            Self::Conversation(id) => write!(f, "conversation_{id}"),
        }
    }
}
