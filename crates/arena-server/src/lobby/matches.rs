//! Host-gated match start with a synchronized start instant.

use std::sync::Arc;

use arena_core::chat::ConversationRef;
use arena_core::errors::{ArenaError, Result};
use arena_core::events::{ArenaEvent, MatchStartEvent};
use arena_core::ids::{LobbyId, ProblemId, UserId};
use arena_core::lobby::LobbyStatus;
use arena_core::store::ArenaStore;
use arena_settings::LobbySettings;
use chrono::Utc;
use metrics::counter;
use tracing::{info, warn};

use super::membership::LobbyMembershipStore;
use crate::group::Group;
use crate::metrics::{MATCHES_STARTED_TOTAL, MATCH_START_FAILURES_TOTAL};
use crate::websocket::broadcast::BroadcastDispatcher;

/// A start request as received from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartMatchRequest {
    /// Problems in play, in order. Must not be empty.
    pub problem_ids: Vec<ProblemId>,
    /// Match length in seconds.
    pub duration_sec: i64,
    /// Requested preparation buffer; `None` uses the configured default.
    pub buffer_sec: Option<i64>,
}

/// Runs the `NotStarted → Starting → InProgress` transition for a lobby.
pub struct MatchStartCoordinator {
    store: Arc<dyn ArenaStore>,
    membership: Arc<LobbyMembershipStore>,
    dispatcher: Arc<BroadcastDispatcher>,
    settings: LobbySettings,
}

impl MatchStartCoordinator {
    /// Create a coordinator.
    pub fn new(
        store: Arc<dyn ArenaStore>,
        membership: Arc<LobbyMembershipStore>,
        dispatcher: Arc<BroadcastDispatcher>,
        settings: LobbySettings,
    ) -> Self {
        Self {
            store,
            membership,
            dispatcher,
            settings,
        }
    }

    /// Effective preparation buffer: the default when absent, never below one
    /// second, never above the configured maximum.
    pub fn clamp_buffer(&self, requested: Option<i64>) -> u32 {
        let max = i64::from(self.settings.max_buffer_sec.max(1));
        let raw = requested.unwrap_or_else(|| i64::from(self.settings.default_buffer_sec));
        u32::try_from(raw.clamp(1, max)).unwrap_or(1)
    }

    fn validate(&self, request: &StartMatchRequest) -> Result<u32> {
        if request.problem_ids.is_empty() {
            return Err(ArenaError::validation("At least one problem is required"));
        }
        let max = i64::from(self.settings.max_duration_sec);
        if !(1..=max).contains(&request.duration_sec) {
            return Err(ArenaError::validation(format!(
                "durationSec must be between 1 and {max}"
            )));
        }
        u32::try_from(request.duration_sec)
            .map_err(|_| ArenaError::validation("durationSec out of range"))
    }

    /// Start the match for `lobby_id` on behalf of `caller`.
    ///
    /// Authorization reads the durable host of record. The status is
    /// persisted before the single `match.started` broadcast; if persisting
    /// fails the lobby returns to `NotStarted` and nothing is broadcast.
    pub async fn start(
        &self,
        lobby_id: LobbyId,
        caller: &UserId,
        request: StartMatchRequest,
    ) -> Result<MatchStartEvent> {
        let result = self.try_start(lobby_id, caller, request).await;
        if let Err(err) = &result {
            counter!(MATCH_START_FAILURES_TOTAL, "error_type" => err.code().as_str()).increment(1);
        }
        result
    }

    async fn try_start(
        &self,
        lobby_id: LobbyId,
        caller: &UserId,
        request: StartMatchRequest,
    ) -> Result<MatchStartEvent> {
        let duration_sec = self.validate(&request)?;

        let record = self
            .store
            .get_lobby(lobby_id)
            .await?
            .ok_or_else(|| ArenaError::not_found(format!("Lobby {lobby_id} not found")))?;
        if record.host != *caller {
            return Err(ArenaError::forbidden("Only the host can start the match"));
        }
        match record.status {
            LobbyStatus::Open => {}
            LobbyStatus::InProgress => {
                return Err(ArenaError::invalid_state("Match already in progress"));
            }
            LobbyStatus::Closed => return Err(ArenaError::invalid_state("Lobby is closed")),
        }

        self.membership.begin_start(&record)?;

        let match_record = match self.store.create_match(lobby_id, &request.problem_ids).await {
            Ok(m) => m,
            Err(e) => {
                self.membership.abort_start(lobby_id);
                return Err(e.into());
            }
        };

        let mut players = vec![record.host.clone()];
        players.extend(record.participants.iter().filter(|p| **p != record.host).cloned());
        if let Err(e) = self
            .store
            .create_conversation(ConversationRef::Match(match_record.match_id), &players)
            .await
        {
            warn!(
                %lobby_id,
                match_id = %match_record.match_id,
                error = %e,
                "failed to create match conversation"
            );
        }

        let buffer_sec = self.clamp_buffer(request.buffer_sec);
        let event = MatchStartEvent::new(
            match_record.match_id,
            request.problem_ids,
            duration_sec,
            buffer_sec,
            Utc::now(),
        );

        match self.store.update_lobby_status(lobby_id, LobbyStatus::InProgress).await {
            Ok(true) => {}
            Ok(false) => {
                self.membership.abort_start(lobby_id);
                return Err(ArenaError::not_found(format!("Lobby {lobby_id} not found")));
            }
            Err(e) => {
                self.membership.abort_start(lobby_id);
                warn!(
                    %lobby_id,
                    error = %e,
                    "failed to persist lobby status, match start rolled back"
                );
                return Err(e.into());
            }
        }
        self.membership.complete_start(lobby_id);

        let recipients = self
            .dispatcher
            .broadcast(Group::Lobby(lobby_id), &ArenaEvent::MatchStarted(event.clone()));
        counter!(MATCHES_STARTED_TOTAL).increment(1);
        info!(
            %lobby_id,
            match_id = %event.match_id,
            problems = event.problem_ids.len(),
            duration_sec,
            buffer_sec,
            recipients,
            "match started"
        );
        Ok(event)
    }
}
