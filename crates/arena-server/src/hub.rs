//! Composition root for the coordination layer.
//!
//! [`ArenaHub`] owns the connection registry, the lobby membership store, the
//! dispatcher, the match start coordinator and the conversation guard, and
//! exposes every operation the RPC and HTTP layers call. Disconnect cleanup
//! lives here because it touches both the registry and the lobby entries.

use std::sync::Arc;

use arena_core::chat::ChatMessage;
use arena_core::errors::{ArenaError, Result};
use arena_core::events::{ArenaEvent, LobbyClosedEvent, LobbyMemberEvent, MatchStartEvent};
use arena_core::ids::{ConnectionId, ConversationId, LobbyId, UserId};
use arena_core::lobby::{LobbyRecord, LobbyStatus};
use arena_core::store::ArenaStore;
use arena_settings::LobbySettings;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::conversation::ConversationGuard;
use crate::group::Group;
use crate::lobby::matches::{MatchStartCoordinator, StartMatchRequest};
use crate::lobby::membership::{LobbyMembershipStore, LobbySummary};
use crate::metrics::CLEANUP_ERRORS_TOTAL;
use crate::websocket::broadcast::BroadcastDispatcher;
use crate::websocket::connection::ClientConnection;
use crate::websocket::registry::ConnectionRegistry;

/// Shared coordination state, one per server.
pub struct ArenaHub {
    store: Arc<dyn ArenaStore>,
    registry: Arc<ConnectionRegistry>,
    membership: Arc<LobbyMembershipStore>,
    dispatcher: Arc<BroadcastDispatcher>,
    matches: MatchStartCoordinator,
    conversations: ConversationGuard,
}

impl ArenaHub {
    /// Wire the components around a durable store.
    pub fn new(store: Arc<dyn ArenaStore>, settings: &LobbySettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let membership = Arc::new(LobbyMembershipStore::new());
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&membership),
        ));
        let matches = MatchStartCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&membership),
            Arc::clone(&dispatcher),
            settings.clone(),
        );
        let conversations = ConversationGuard::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            settings.max_message_length,
        );
        Self {
            store,
            registry,
            membership,
            dispatcher,
            matches,
            conversations,
        }
    }

    /// Connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Lobby membership store.
    pub fn membership(&self) -> &LobbyMembershipStore {
        &self.membership
    }

    /// Event dispatcher.
    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    // ── connections ─────────────────────────────────────────────────

    /// Register a new connection. Idempotent.
    pub fn on_connect(&self, connection: Arc<ClientConnection>) -> Arc<ClientConnection> {
        let connection = self.registry.register(connection);
        info!(connection_id = %connection.id, user_id = %connection.user_id, "client connected");
        connection
    }

    /// Remove a connection from every group it held.
    ///
    /// A user who loses their last connection in a lobby is announced with
    /// `lobby.member_left`. Never fails; inconsistencies are logged.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) {
        let Some((connection, groups)) = self.registry.unregister(connection_id) else {
            debug!(%connection_id, "disconnect for unknown connection");
            return;
        };
        for group in groups {
            let Group::Lobby(lobby_id) = group else {
                continue;
            };
            match self.membership.remove_connection(lobby_id, connection_id) {
                Some(removed) if removed.user_left => {
                    self.announce_left(lobby_id, removed.user_id, false);
                }
                Some(_) => {}
                None => {
                    counter!(CLEANUP_ERRORS_TOTAL).increment(1);
                    warn!(
                        %connection_id,
                        %lobby_id,
                        "connection held a lobby group missing from the lobby entry"
                    );
                }
            }
        }
        info!(
            %connection_id,
            user_id = %connection.user_id,
            dropped = connection.drop_count(),
            "client disconnected"
        );
    }

    fn announce_left(&self, lobby_id: LobbyId, user_id: UserId, kicked: bool) {
        let event = ArenaEvent::MemberLeft(LobbyMemberEvent {
            lobby_id,
            user_id,
            kicked,
        });
        let _ = self.dispatcher.broadcast(Group::Lobby(lobby_id), &event);
    }

    // ── lobbies ─────────────────────────────────────────────────────

    async fn load_lobby(&self, lobby_id: LobbyId) -> Result<LobbyRecord> {
        self.store
            .get_lobby(lobby_id)
            .await?
            .ok_or_else(|| ArenaError::not_found(format!("Lobby {lobby_id} not found")))
    }

    async fn require_host(&self, lobby_id: LobbyId, caller: &UserId, action: &str) -> Result<()> {
        let host = self
            .store
            .lobby_host(lobby_id)
            .await?
            .ok_or_else(|| ArenaError::not_found(format!("Lobby {lobby_id} not found")))?;
        if host == *caller {
            Ok(())
        } else {
            Err(ArenaError::forbidden(format!("Only the host can {action}")))
        }
    }

    /// Join `connection` to the lobby group.
    ///
    /// The user must be the host or a recorded participant. The first
    /// connection of a user announces `lobby.member_joined`.
    pub async fn join_lobby(
        &self,
        connection: &ClientConnection,
        lobby_id: LobbyId,
    ) -> Result<LobbyRecord> {
        let record = self.load_lobby(lobby_id).await?;
        if record.status == LobbyStatus::Closed {
            return Err(ArenaError::invalid_state("Lobby is closed"));
        }
        if !record.has_participant(&connection.user_id) {
            return Err(ArenaError::forbidden(format!(
                "Not a participant of lobby {lobby_id}"
            )));
        }
        let first = connection
            .attach(Group::Lobby(lobby_id), |_| {
                self.membership
                    .join(&record, &connection.user_id, &connection.id)
            })
            .ok_or_else(|| ArenaError::invalid_state("Connection is closing"))?;

        if first {
            let event = ArenaEvent::MemberJoined(LobbyMemberEvent {
                lobby_id,
                user_id: connection.user_id.clone(),
                kicked: false,
            });
            let _ = self.dispatcher.broadcast(Group::Lobby(lobby_id), &event);
        }
        debug!(connection_id = %connection.id, %lobby_id, first, "joined lobby group");
        Ok(record)
    }

    /// Remove `connection` from the lobby group. Idempotent.
    pub fn leave_lobby(&self, connection: &ClientConnection, lobby_id: LobbyId) {
        let removed = connection.detach(Group::Lobby(lobby_id), |held| {
            held.then(|| self.membership.remove_connection(lobby_id, &connection.id))
                .flatten()
        });
        if let Some(removed) = removed {
            if removed.user_left {
                self.announce_left(lobby_id, removed.user_id, false);
            }
        }
    }

    /// Remove `target` from the lobby on behalf of the host.
    ///
    /// The `lobby.member_left` event (with `kicked`) goes out before the
    /// target's connections leave the group, so the target sees it too.
    pub async fn kick_participant(
        &self,
        lobby_id: LobbyId,
        caller: &UserId,
        target: &UserId,
    ) -> Result<()> {
        self.require_host(lobby_id, caller, "kick participants").await?;
        if caller == target {
            return Err(ArenaError::validation("The host cannot kick themselves"));
        }
        if !self.store.remove_lobby_participant(lobby_id, target).await? {
            return Err(ArenaError::not_found(format!(
                "{target} is not a participant of lobby {lobby_id}"
            )));
        }

        self.announce_left(lobby_id, target.clone(), true);
        let dropped = self.membership.remove_user(lobby_id, target);
        for id in &dropped {
            if let Some(conn) = self.registry.get(id) {
                conn.detach(Group::Lobby(lobby_id), |_| ());
            }
        }
        info!(%lobby_id, user_id = %target, connections = dropped.len(), "participant kicked");
        Ok(())
    }

    /// Close the lobby on behalf of the host.
    ///
    /// Rejected with `InvalidState` while a match start is in flight.
    pub async fn close_lobby(&self, lobby_id: LobbyId, caller: &UserId) -> Result<()> {
        self.require_host(lobby_id, caller, "close the lobby").await?;
        self.membership.begin_close(lobby_id)?;
        let persisted = self.store.update_lobby_status(lobby_id, LobbyStatus::Closed).await;
        self.membership.finish_close(lobby_id, matches!(persisted, Ok(true)));
        if !persisted? {
            return Err(ArenaError::not_found(format!("Lobby {lobby_id} not found")));
        }
        let event = ArenaEvent::LobbyClosed(LobbyClosedEvent { lobby_id });
        let _ = self.dispatcher.broadcast(Group::Lobby(lobby_id), &event);
        info!(%lobby_id, "lobby closed");
        Ok(())
    }

    /// Re-read the lobby, refresh the cache and broadcast `lobby.updated`.
    pub async fn notify_lobby_updated(&self, lobby_id: LobbyId) -> Result<LobbyRecord> {
        let record = self.load_lobby(lobby_id).await?;
        self.membership.refresh_from_record(&record);
        let _ = self
            .dispatcher
            .broadcast(Group::Lobby(lobby_id), &ArenaEvent::LobbyUpdated(record.clone()));
        Ok(record)
    }

    /// Start the match for a lobby.
    pub async fn start_match(
        &self,
        lobby_id: LobbyId,
        caller: &UserId,
        request: StartMatchRequest,
    ) -> Result<MatchStartEvent> {
        self.matches.start(lobby_id, caller, request).await
    }

    /// Live lobby entries.
    pub fn lobby_summaries(&self) -> Vec<LobbySummary> {
        self.membership.summaries()
    }

    // ── conversations ───────────────────────────────────────────────

    /// Join a conversation group.
    pub async fn join_conversation(
        &self,
        connection: &ClientConnection,
        conversation_id: ConversationId,
    ) -> Result<()> {
        self.conversations.join(connection, conversation_id).await
    }

    /// Leave a conversation group. Idempotent.
    pub fn leave_conversation(
        &self,
        connection: &ClientConnection,
        conversation_id: ConversationId,
    ) {
        self.conversations.leave(connection, conversation_id);
    }

    /// Persist and broadcast a chat message.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        self.conversations.send(conversation_id, sender, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::logging::capture_logs;
    use arena_core::store::MemoryStore;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: ArenaHub,
        lobby: LobbyId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let lobby = store.create_lobby("Arena", UserId::from("a@x.io"), 4);
        let _ = store.add_lobby_participant(lobby, UserId::from("b@x.io"));
        let hub = ArenaHub::new(
            Arc::clone(&store) as Arc<dyn ArenaStore>,
            &LobbySettings::default(),
        );
        Fixture { store, hub, lobby }
    }

    fn connect(
        f: &Fixture,
        id: &str,
        user: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = f
            .hub
            .on_connect(Arc::new(ClientConnection::new(id.into(), user.into(), tx)));
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn types(events: &[serde_json::Value]) -> Vec<&str> {
        events.iter().map(|e| e["type"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn join_announces_first_connection_only() {
        let f = fixture();
        let (a1, mut rx_a1) = connect(&f, "a1", "a@x.io");
        let (a2, _rx_a2) = connect(&f, "a2", "a@x.io");
        let _ = f.hub.join_lobby(&a1, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&a2, f.lobby).await.unwrap();

        assert_eq!(types(&drain(&mut rx_a1)), ["lobby.member_joined"]);
        assert!(f.hub.membership().is_host(f.lobby, &UserId::from("a@x.io")));
        assert_eq!(f.hub.membership().get_connections(f.lobby).len(), 2);
    }

    #[tokio::test]
    async fn outsider_and_unknown_lobby_rejected() {
        let f = fixture();
        let (c, _rx) = connect(&f, "c1", "c@x.io");
        assert_matches!(f.hub.join_lobby(&c, f.lobby).await, Err(ArenaError::Authorization { .. }));
        assert_matches!(
            f.hub.join_lobby(&c, LobbyId::new(404)).await,
            Err(ArenaError::NotFound { .. })
        );
        assert!(c.groups().is_empty());
        assert_eq!(f.hub.membership().lobby_count(), 0);
    }

    #[tokio::test]
    async fn user_stays_present_while_second_connection_lives() {
        let f = fixture();
        let (a1, _rx1) = connect(&f, "a1", "a@x.io");
        let (a2, mut rx2) = connect(&f, "a2", "a@x.io");
        let _ = f.hub.join_lobby(&a1, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&a2, f.lobby).await.unwrap();
        let _ = drain(&mut rx2);

        f.hub.on_disconnect(&a1.id);

        assert!(f.hub.membership().is_member(f.lobby, &UserId::from("a@x.io")));
        assert_eq!(f.hub.membership().get_connections(f.lobby), vec![a2.id.clone()]);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn last_disconnect_announces_member_left() {
        let f = fixture();
        let (a, _rx_a) = connect(&f, "a1", "a@x.io");
        let (b, mut rx_b) = connect(&f, "b1", "b@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&b, f.lobby).await.unwrap();
        let _ = drain(&mut rx_b);

        f.hub.on_disconnect(&a.id);
        f.hub.on_disconnect(&a.id);

        let events = drain(&mut rx_b);
        assert_eq!(types(&events), ["lobby.member_left"]);
        assert_eq!(events[0]["data"]["userId"], "a@x.io");
        assert!(events[0]["data"].get("kicked").is_none());
        assert_eq!(f.hub.registry().count(), 1);
    }

    #[tokio::test]
    async fn disconnect_leaves_conversation_groups() {
        let f = fixture();
        let conv = f.store.lobby_conversation(f.lobby).unwrap();
        let (a, _rx) = connect(&f, "a1", "a@x.io");
        f.hub.join_conversation(&a, conv).await.unwrap();
        f.hub.on_disconnect(&a.id);
        assert!(f.hub.registry().conversation_members(conv).is_empty());
    }

    #[tokio::test]
    async fn join_after_disconnect_is_refused() {
        let f = fixture();
        let (a, _rx) = connect(&f, "a1", "a@x.io");
        f.hub.on_disconnect(&a.id);
        assert_matches!(f.hub.join_lobby(&a, f.lobby).await, Err(ArenaError::InvalidState { .. }));
        assert_eq!(f.hub.membership().get_connections(f.lobby).len(), 0);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let f = fixture();
        let (a, _rx_a) = connect(&f, "a1", "a@x.io");
        let (b, mut rx_b) = connect(&f, "b1", "b@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&b, f.lobby).await.unwrap();
        let _ = drain(&mut rx_b);

        f.hub.leave_lobby(&a, f.lobby);
        f.hub.leave_lobby(&a, f.lobby);
        assert_eq!(types(&drain(&mut rx_b)), ["lobby.member_left"]);
        assert!(!a.in_group(Group::Lobby(f.lobby)));
    }

    #[tokio::test]
    async fn kick_notifies_then_removes_target() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, "a1", "a@x.io");
        let (b, mut rx_b) = connect(&f, "b1", "b@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&b, f.lobby).await.unwrap();
        let _ = drain(&mut rx_a);
        let _ = drain(&mut rx_b);

        f.hub
            .kick_participant(f.lobby, &a.user_id, &b.user_id)
            .await
            .unwrap();

        let seen_by_b = drain(&mut rx_b);
        assert_eq!(seen_by_b[0]["data"]["kicked"], true);
        assert_eq!(types(&drain(&mut rx_a)), ["lobby.member_left"]);
        assert!(!b.in_group(Group::Lobby(f.lobby)));
        assert!(!f.hub.membership().is_member(f.lobby, &b.user_id));
        assert!(!f.store.lobby(f.lobby).unwrap().participants.contains(&b.user_id));
    }

    #[tokio::test]
    async fn only_host_may_kick_or_close() {
        let f = fixture();
        let b = UserId::from("b@x.io");
        let a = UserId::from("a@x.io");
        assert_matches!(
            f.hub.kick_participant(f.lobby, &b, &a).await,
            Err(ArenaError::Authorization { .. })
        );
        assert_matches!(
            f.hub.close_lobby(f.lobby, &b).await,
            Err(ArenaError::Authorization { .. })
        );
        assert_matches!(
            f.hub.kick_participant(f.lobby, &a, &a).await,
            Err(ArenaError::Validation { .. })
        );
        assert_matches!(
            f.hub.kick_participant(f.lobby, &a, &UserId::from("z@x.io")).await,
            Err(ArenaError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn close_persists_and_broadcasts() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, "a1", "a@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = drain(&mut rx_a);

        f.hub.close_lobby(f.lobby, &a.user_id).await.unwrap();

        assert_eq!(types(&drain(&mut rx_a)), ["lobby.closed"]);
        assert_eq!(f.store.lobby(f.lobby).unwrap().status, LobbyStatus::Closed);
        assert_eq!(f.hub.membership().status(f.lobby), Some(LobbyStatus::Closed));
        let (b, _rx_b) = connect(&f, "b1", "b@x.io");
        assert_matches!(f.hub.join_lobby(&b, f.lobby).await, Err(ArenaError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn notify_updated_refreshes_host_cache() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, "a1", "a@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = drain(&mut rx_a);

        assert!(f.store.set_lobby_host(f.lobby, UserId::from("b@x.io")));
        let record = f.hub.notify_lobby_updated(f.lobby).await.unwrap();

        assert_eq!(record.host, UserId::from("b@x.io"));
        assert!(f.hub.membership().is_host(f.lobby, &UserId::from("b@x.io")));
        let events = drain(&mut rx_a);
        assert_eq!(types(&events), ["lobby.updated"]);
        assert_eq!(events[0]["data"]["host"], "b@x.io");
    }

    #[tokio::test]
    async fn start_match_reaches_joined_lobby() {
        let f = fixture();
        let (b, mut rx_b) = connect(&f, "b1", "b@x.io");
        let _ = f.hub.join_lobby(&b, f.lobby).await.unwrap();
        let _ = drain(&mut rx_b);

        let event = f
            .hub
            .start_match(
                f.lobby,
                &UserId::from("a@x.io"),
                StartMatchRequest {
                    problem_ids: vec![arena_core::ids::ProblemId::new()],
                    duration_sec: 600,
                    buffer_sec: Some(5),
                },
            )
            .await
            .unwrap();

        let events = drain(&mut rx_b);
        assert_eq!(types(&events), ["match.started"]);
        assert_eq!(events[0]["data"]["matchId"], event.match_id.to_string());
    }

    #[tokio::test]
    async fn summaries_list_live_lobbies() {
        let f = fixture();
        let (a, _rx) = connect(&f, "a1", "a@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let summaries = f.hub.lobby_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].lobby_id, f.lobby);
        assert_eq!(summaries[0].member_count, 1);
    }

    #[tokio::test]
    async fn emptied_lobby_entry_is_evicted() {
        let f = fixture();
        let (a, _rx_a) = connect(&f, "a1", "a@x.io");
        let (b, _rx_b) = connect(&f, "b1", "b@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        let _ = f.hub.join_lobby(&b, f.lobby).await.unwrap();
        assert_eq!(f.hub.membership().lobby_count(), 1);

        f.hub.leave_lobby(&a, f.lobby);
        f.hub.on_disconnect(&b.id);
        assert_eq!(f.hub.membership().lobby_count(), 0);

        let _ = f.hub.notify_lobby_updated(f.lobby).await.unwrap();
        assert_eq!(f.hub.membership().lobby_count(), 0);
        assert!(f.hub.lobby_summaries().is_empty());

        // rejoining rebuilds the entry from the durable record
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        assert!(f.hub.membership().is_host(f.lobby, &UserId::from("a@x.io")));
    }

    #[tokio::test]
    async fn close_is_refused_while_a_start_is_in_flight() {
        let f = fixture();
        let host = UserId::from("a@x.io");
        let record = f.store.lobby(f.lobby).unwrap();
        f.hub.membership().begin_start(&record).unwrap();

        assert_matches!(
            f.hub.close_lobby(f.lobby, &host).await,
            Err(ArenaError::InvalidState { .. })
        );
        assert_eq!(f.store.lobby(f.lobby).unwrap().status, LobbyStatus::Open);

        f.hub.membership().abort_start(f.lobby);
        f.hub.close_lobby(f.lobby, &host).await.unwrap();
        assert_eq!(f.store.lobby(f.lobby).unwrap().status, LobbyStatus::Closed);
    }

    #[tokio::test]
    async fn failed_close_lifts_the_start_fence() {
        let f = fixture();
        let host = UserId::from("a@x.io");
        f.store.set_fail_writes(true);
        assert_matches!(
            f.hub.close_lobby(f.lobby, &host).await,
            Err(ArenaError::TransientStorage(_))
        );
        assert_eq!(f.hub.membership().lobby_count(), 0);

        f.store.set_fail_writes(false);
        let record = f.store.lobby(f.lobby).unwrap();
        f.hub.membership().begin_start(&record).unwrap();
    }

    #[tokio::test]
    async fn inconsistent_cleanup_is_logged_not_raised() {
        let f = fixture();
        let (a, _rx) = connect(&f, "a1", "a@x.io");
        let _ = f.hub.join_lobby(&a, f.lobby).await.unwrap();
        // drop the entry behind the connection's back
        let _ = f.hub.membership().remove_user(f.lobby, &a.user_id);

        let (logs, _guard) = capture_logs();
        f.hub.on_disconnect(&a.id);
        assert!(logs.has_event(tracing::Level::WARN, "missing from the lobby entry"));
    }
}
