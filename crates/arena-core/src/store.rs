//! Boundary to the durable store.
//!
//! The coordination layer never persists anything itself. Lobby records,
//! matches, conversations and messages live behind [`ArenaStore`]; the store
//! is also the only authority for who hosts a lobby and who may chat in a
//! conversation.
//!
//! [`MemoryStore`] is a process-local implementation used by the development
//! binary and by tests. It can be seeded from JSON and told to fail writes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

use crate::chat::{ChatMessage, ConversationRef, display_name};
use crate::ids::{ConversationId, LobbyId, MessageId, MatchId, ProblemId, UserId};
use crate::lobby::{LobbyRecord, LobbyStatus, MatchRecord};

/// Failure reported by a durable-store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the write.
    #[error("store rejected write: {0}")]
    Conflict(String),
}

/// Durable lobby, match and conversation storage.
#[async_trait]
pub trait ArenaStore: Send + Sync {
    /// Load a lobby record.
    async fn get_lobby(&self, lobby_id: LobbyId) -> Result<Option<LobbyRecord>, StoreError>;

    /// Host of record, if the lobby exists.
    async fn lobby_host(&self, lobby_id: LobbyId) -> Result<Option<UserId>, StoreError>;

    /// Persist a lobby status. Returns `false` when the lobby does not exist.
    async fn update_lobby_status(
        &self,
        lobby_id: LobbyId,
        status: LobbyStatus,
    ) -> Result<bool, StoreError>;

    /// Remove a participant from a lobby. Returns `false` if they were not one.
    async fn remove_lobby_participant(
        &self,
        lobby_id: LobbyId,
        user: &UserId,
    ) -> Result<bool, StoreError>;

    /// Create the match record for a lobby.
    async fn create_match(
        &self,
        lobby_id: LobbyId,
        problem_ids: &[ProblemId],
    ) -> Result<MatchRecord, StoreError>;

    /// Create a conversation with the given participants.
    async fn create_conversation(
        &self,
        reference: ConversationRef,
        participants: &[UserId],
    ) -> Result<ConversationId, StoreError>;

    /// Whether `user` is a recorded participant. Unknown conversations have
    /// no participants.
    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user: &UserId,
    ) -> Result<bool, StoreError>;

    /// Recorded participants, or `None` for an unknown conversation.
    async fn conversation_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Vec<UserId>>, StoreError>;

    /// Persist a message and return its id.
    async fn save_message(
        &self,
        conversation_id: ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<MessageId, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Initial data for a [`MemoryStore`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedData {
    /// Lobbies to create, in order (ids start at 1).
    pub lobbies: Vec<SeedLobby>,
    /// Standalone friend conversations.
    pub conversations: Vec<SeedConversation>,
}

/// A seeded lobby.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedLobby {
    /// Display name.
    pub name: String,
    /// Host.
    pub host: UserId,
    /// Other participants.
    #[serde(default)]
    pub participants: Vec<UserId>,
    /// Capacity.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

fn default_max_players() -> u32 {
    10
}

/// A seeded friend conversation.
#[derive(Clone, Debug, Deserialize)]
pub struct SeedConversation {
    /// Participants.
    pub participants: Vec<UserId>,
}

#[derive(Debug)]
struct ConversationRow {
    reference: ConversationRef,
    participants: HashSet<UserId>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    lobbies: HashMap<LobbyId, LobbyRecord>,
    matches: Vec<MatchRecord>,
    conversations: HashMap<ConversationId, ConversationRow>,
    messages: Vec<ChatMessage>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_conversation(
        &mut self,
        reference: ConversationRef,
        participants: impl IntoIterator<Item = UserId>,
    ) -> ConversationId {
        let id = ConversationId::new(self.next_id());
        let _ = self.conversations.insert(
            id,
            ConversationRow {
                reference,
                participants: participants.into_iter().collect(),
            },
        );
        id
    }

    fn lobby_conversation(&self, lobby_id: LobbyId) -> Option<ConversationId> {
        self.conversations
            .iter()
            .find(|(_, row)| row.reference == ConversationRef::Lobby(lobby_id))
            .map(|(id, _)| *id)
    }
}

/// In-process [`ArenaStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from seed data.
    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for lobby in seed.lobbies {
            let id = store.create_lobby(&lobby.name, lobby.host, lobby.max_players);
            for user in lobby.participants {
                let _ = store.add_lobby_participant(id, user);
            }
        }
        for conv in seed.conversations {
            let _ = store.insert_conversation(ConversationRef::Friend, conv.participants);
        }
        store
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    /// Create an open lobby hosted by `host`, along with its lobby conversation.
    pub fn create_lobby(&self, name: &str, host: UserId, max_players: u32) -> LobbyId {
        let mut t = self.tables.write();
        let lobby_id = LobbyId::new(t.next_id());
        let record = LobbyRecord {
            lobby_id,
            name: name.to_owned(),
            host: host.clone(),
            status: LobbyStatus::Open,
            participants: Vec::new(),
            max_players,
            created_at: Utc::now(),
        };
        let _ = t.lobbies.insert(lobby_id, record);
        let _ = t.insert_conversation(ConversationRef::Lobby(lobby_id), [host]);
        lobby_id
    }

    /// Record `user` as a lobby participant and add them to the lobby
    /// conversation. Returns `false` for an unknown lobby.
    pub fn add_lobby_participant(&self, lobby_id: LobbyId, user: UserId) -> bool {
        let mut t = self.tables.write();
        let Some(record) = t.lobbies.get_mut(&lobby_id) else {
            return false;
        };
        if !record.has_participant(&user) {
            record.participants.push(user.clone());
        }
        if let Some(conv) = t.lobby_conversation(lobby_id) {
            if let Some(row) = t.conversations.get_mut(&conv) {
                let _ = row.participants.insert(user);
            }
        }
        true
    }

    /// Reassign the host of record.
    pub fn set_lobby_host(&self, lobby_id: LobbyId, host: UserId) -> bool {
        let mut t = self.tables.write();
        match t.lobbies.get_mut(&lobby_id) {
            Some(record) => {
                record.participants.retain(|p| *p != host);
                record.host = host;
                true
            }
            None => false,
        }
    }

    /// Create a conversation synchronously.
    pub fn insert_conversation(
        &self,
        reference: ConversationRef,
        participants: impl IntoIterator<Item = UserId>,
    ) -> ConversationId {
        self.tables.write().insert_conversation(reference, participants)
    }

    /// Conversation attached to a lobby.
    pub fn lobby_conversation(&self, lobby_id: LobbyId) -> Option<ConversationId> {
        self.tables.read().lobby_conversation(lobby_id)
    }

    /// Conversation attached to a match.
    pub fn match_conversation(&self, match_id: MatchId) -> Option<ConversationId> {
        self.tables
            .read()
            .conversations
            .iter()
            .find(|(_, row)| row.reference == ConversationRef::Match(match_id))
            .map(|(id, _)| *id)
    }

    /// Snapshot of a lobby record.
    pub fn lobby(&self, lobby_id: LobbyId) -> Option<LobbyRecord> {
        self.tables.read().lobbies.get(&lobby_id).cloned()
    }

    /// All match records created so far.
    pub fn matches(&self) -> Vec<MatchRecord> {
        self.tables.read().matches.clone()
    }

    /// Persisted messages of one conversation, oldest first.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<ChatMessage> {
        self.tables
            .read()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArenaStore for MemoryStore {
    async fn get_lobby(&self, lobby_id: LobbyId) -> Result<Option<LobbyRecord>, StoreError> {
        Ok(self.lobby(lobby_id))
    }

    async fn lobby_host(&self, lobby_id: LobbyId) -> Result<Option<UserId>, StoreError> {
        Ok(self.tables.read().lobbies.get(&lobby_id).map(|r| r.host.clone()))
    }

    async fn update_lobby_status(
        &self,
        lobby_id: LobbyId,
        status: LobbyStatus,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut t = self.tables.write();
        Ok(t.lobbies
            .get_mut(&lobby_id)
            .map(|r| r.status = status)
            .is_some())
    }

    async fn remove_lobby_participant(
        &self,
        lobby_id: LobbyId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut t = self.tables.write();
        let Some(record) = t.lobbies.get_mut(&lobby_id) else {
            return Ok(false);
        };
        let before = record.participants.len();
        record.participants.retain(|p| p != user);
        let removed = record.participants.len() != before;
        if removed {
            if let Some(conv) = t.lobby_conversation(lobby_id) {
                if let Some(row) = t.conversations.get_mut(&conv) {
                    let _ = row.participants.remove(user);
                }
            }
        }
        Ok(removed)
    }

    async fn create_match(
        &self,
        lobby_id: LobbyId,
        problem_ids: &[ProblemId],
    ) -> Result<MatchRecord, StoreError> {
        self.check_writable()?;
        let mut t = self.tables.write();
        if !t.lobbies.contains_key(&lobby_id) {
            return Err(StoreError::Conflict(format!("lobby {lobby_id} does not exist")));
        }
        let record = MatchRecord {
            match_id: MatchId::new(),
            lobby_id,
            problem_ids: problem_ids.to_vec(),
            created_at: Utc::now(),
        };
        t.matches.push(record.clone());
        Ok(record)
    }

    async fn create_conversation(
        &self,
        reference: ConversationRef,
        participants: &[UserId],
    ) -> Result<ConversationId, StoreError> {
        self.check_writable()?;
        Ok(self.insert_conversation(reference, participants.iter().cloned()))
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .conversations
            .get(&conversation_id)
            .is_some_and(|row| row.participants.contains(user)))
    }

    async fn conversation_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Vec<UserId>>, StoreError> {
        Ok(self
            .tables
            .read()
            .conversations
            .get(&conversation_id)
            .map(|row| {
                let mut users: Vec<_> = row.participants.iter().cloned().collect();
                users.sort();
                users
            }))
    }

    async fn save_message(
        &self,
        conversation_id: ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<MessageId, StoreError> {
        self.check_writable()?;
        let mut t = self.tables.write();
        if !t.conversations.contains_key(&conversation_id) {
            return Err(StoreError::Conflict(format!(
                "conversation {conversation_id} does not exist"
            )));
        }
        let message_id = MessageId::new(t.next_id());
        t.messages.push(ChatMessage {
            message_id,
            conversation_id,
            sender_id: sender.clone(),
            sender_name: display_name(sender),
            content: content.to_owned(),
            sent_at: Utc::now(),
        });
        Ok(message_id)
    }
}
