//! Event fan-out to lobby and conversation groups.

use std::sync::Arc;

use arena_core::events::ArenaEvent;
use arena_core::ids::ConnectionId;
use metrics::counter;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;
use crate::group::Group;
use crate::lobby::membership::LobbyMembershipStore;
use crate::metrics::{EVENTS_BROADCAST_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use crate::rpc::types::RpcEvent;

/// Best-effort delivery of events to every connection in a group.
///
/// A failed delivery to one connection never blocks the others and never
/// surfaces to the caller. Dead connections are left for disconnect cleanup.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<LobbyMembershipStore>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over the shared registry and membership store.
    pub fn new(registry: Arc<ConnectionRegistry>, membership: Arc<LobbyMembershipStore>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    /// Connections currently in `group`.
    fn recipients(&self, group: Group) -> Vec<ConnectionId> {
        match group {
            Group::Lobby(lobby_id) => self.membership.get_connections(lobby_id),
            Group::Conversation(conv) => self.registry.conversation_members(conv),
        }
    }

    /// Broadcast `event` to `group`. Returns the number of connections the
    /// frame was queued on.
    pub fn broadcast(&self, group: Group, event: &ArenaEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let recipients = self.recipients(group);
        let mut delivered = 0;
        for id in &recipients {
            let Some(conn) = self.registry.get(id) else {
                continue;
            };
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL, "group_kind" => group.kind()).increment(1);
                warn!(
                    connection_id = %conn.id,
                    %group,
                    event_type = event.event_type(),
                    "failed to queue event for client"
                );
            }
        }
        counter!(EVENTS_BROADCAST_TOTAL, "event_type" => event.event_type()).increment(1);
        debug!(
            %group,
            event_type = event.event_type(),
            recipients = recipients.len(),
            delivered,
            "broadcast event to group"
        );
        delivered
    }

    /// Send a single event to one connection.
    pub fn send_to(&self, connection: &ClientConnection, event: &RpcEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => connection.send(Arc::new(json)),
            Err(e) => {
                warn!(event_type = event.event_type, error = %e, "failed to serialize event");
                false
            }
        }
    }
}

/// Serialize the event envelope once for every recipient.
fn encode(event: &ArenaEvent) -> Option<Arc<String>> {
    let envelope = match event.payload() {
        Ok(data) => RpcEvent::new(event.event_type(), Some(data)),
        Err(e) => {
            warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
            return None;
        }
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
            None
        }
    }
}
