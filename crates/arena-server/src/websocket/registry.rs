//! Registry of live connections and the conversation group index.

use std::collections::HashSet;
use std::sync::Arc;

use arena_core::ids::{ConnectionId, ConversationId};
use dashmap::DashMap;
use tracing::debug;

use super::connection::ClientConnection;
use crate::group::Group;

/// Live connections by id, plus connection sets for conversation groups.
///
/// Lobby group membership lives in the lobby membership store; each
/// connection still records every group it joined so disconnect cleanup can
/// visit all of them.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    conversations: DashMap<ConversationId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Idempotent: registering the same id twice
    /// keeps the first instance and returns it.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Arc<ClientConnection> {
        let id = connection.id.clone();
        let entry = self.connections.entry(id).or_insert(connection);
        Arc::clone(entry.value())
    }

    /// Remove a connection and return it with the groups it held.
    ///
    /// The connection is closed first, so any join racing this call fails.
    /// Conversation groups are dropped from the index here; lobby groups are
    /// returned for the caller to reconcile. Unknown ids yield `None`.
    pub fn unregister(&self, id: &ConnectionId) -> Option<(Arc<ClientConnection>, Vec<Group>)> {
        let (_, connection) = self.connections.remove(id)?;
        let groups = connection.close();
        for group in &groups {
            if let Group::Conversation(conv) = group {
                self.remove_from_index(*conv, id);
            }
        }
        debug!(connection_id = %id, groups = groups.len(), "connection unregistered");
        Some((connection, groups))
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Add a connection to a conversation group.
    ///
    /// Returns `false` when the connection is unknown or already closed.
    pub fn join_conversation(&self, connection: &ClientConnection, conv: ConversationId) -> bool {
        connection
            .attach(Group::Conversation(conv), |_| {
                let _ = self
                    .conversations
                    .entry(conv)
                    .or_default()
                    .insert(connection.id.clone());
            })
            .is_some()
    }

    /// Remove a connection from a conversation group. Idempotent.
    pub fn leave_conversation(&self, connection: &ClientConnection, conv: ConversationId) {
        connection.detach(Group::Conversation(conv), |_| {
            self.remove_from_index(conv, &connection.id);
        });
    }

    /// Snapshot of the connections currently in a conversation group.
    pub fn conversation_members(&self, conv: ConversationId) -> Vec<ConnectionId> {
        self.conversations
            .get(&conv)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove_from_index(&self, conv: ConversationId, id: &ConnectionId) {
        if let Some(mut set) = self.conversations.get_mut(&conv) {
            let _ = set.remove(id);
        }
        let _ = self.conversations.remove_if(&conv, |_, set| set.is_empty());
    }
}
