//! Participant-gated conversation access and messaging.

use std::sync::Arc;

use arena_core::chat::{ChatMessage, display_name};
use arena_core::errors::{ArenaError, Result};
use arena_core::events::ArenaEvent;
use arena_core::ids::{ConversationId, UserId};
use arena_core::store::ArenaStore;
use chrono::Utc;
use metrics::counter;
use tracing::{debug, info};

use crate::group::Group;
use crate::metrics::MESSAGES_SENT_TOTAL;
use crate::websocket::broadcast::BroadcastDispatcher;
use crate::websocket::connection::ClientConnection;
use crate::websocket::registry::ConnectionRegistry;

/// Checks durable conversation membership before any group or message
/// side effect.
pub struct ConversationGuard {
    store: Arc<dyn ArenaStore>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    max_message_length: usize,
}

impl ConversationGuard {
    /// Create a guard.
    pub fn new(
        store: Arc<dyn ArenaStore>,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<BroadcastDispatcher>,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            max_message_length,
        }
    }

    async fn require_participant(
        &self,
        conversation_id: ConversationId,
        user: &UserId,
    ) -> Result<()> {
        if self.store.is_participant(conversation_id, user).await? {
            Ok(())
        } else {
            Err(ArenaError::forbidden(format!(
                "Not a participant of conversation {conversation_id}"
            )))
        }
    }

    /// Put `connection` in the conversation group if its user is a recorded
    /// participant.
    pub async fn join(
        &self,
        connection: &ClientConnection,
        conversation_id: ConversationId,
    ) -> Result<()> {
        self.require_participant(conversation_id, &connection.user_id).await?;
        if !self.registry.join_conversation(connection, conversation_id) {
            return Err(ArenaError::invalid_state("Connection is closing"));
        }
        debug!(connection_id = %connection.id, %conversation_id, "joined conversation group");
        Ok(())
    }

    /// Remove `connection` from the conversation group. Idempotent.
    pub fn leave(&self, connection: &ClientConnection, conversation_id: ConversationId) {
        self.registry.leave_conversation(connection, conversation_id);
    }

    /// Persist and broadcast a message.
    ///
    /// Content is trimmed; empty or oversize content is rejected before the
    /// membership check or any write.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ArenaError::validation("Message content cannot be empty"));
        }
        let length = content.chars().count();
        if length > self.max_message_length {
            return Err(ArenaError::validation(format!(
                "Message exceeds maximum length ({length} > {})",
                self.max_message_length
            )));
        }
        self.require_participant(conversation_id, sender).await?;

        let message_id = self.store.save_message(conversation_id, sender, content).await?;
        let message = ChatMessage {
            message_id,
            conversation_id,
            sender_id: sender.clone(),
            sender_name: display_name(sender),
            content: content.to_owned(),
            sent_at: Utc::now(),
        };
        let recipients = self.dispatcher.broadcast(
            Group::Conversation(conversation_id),
            &ArenaEvent::MessageCreated(message.clone()),
        );
        counter!(MESSAGES_SENT_TOTAL).increment(1);
        info!(%conversation_id, %message_id, recipients, "message sent");
        Ok(message)
    }
}
