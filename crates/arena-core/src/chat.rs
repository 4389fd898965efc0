//! Conversation and chat message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, LobbyId, MatchId, MessageId, UserId};

/// What a conversation is attached to.
///
/// Lobby and match conversations are created one-to-one alongside their
/// owner; friend conversations stand alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "referenceId")]
pub enum ConversationRef {
    /// Lobby chat.
    Lobby(LobbyId),
    /// Match chat.
    Match(MatchId),
    /// Direct chat between friends.
    Friend,
}

/// A persisted chat message, as broadcast to the conversation group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Store-assigned id.
    pub message_id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Short display name derived from the sender id.
    pub sender_name: String,
    /// Trimmed message body.
    pub content: String,
    /// Server time the message was accepted.
    pub sent_at: DateTime<Utc>,
}

/// Display name for a user id: the local part of an e-mail address, or the
/// id itself when it has no `@` (or starts with one).
pub fn display_name(user: &UserId) -> String {
    match user.find('@') {
        Some(at) if at > 0 => user[..at].to_owned(),
        _ => user.to_string(),
    }
}
