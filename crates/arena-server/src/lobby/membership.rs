//! In-memory lobby membership with per-lobby locking.
//!
//! Each lobby entry sits behind its own `parking_lot::Mutex` inside a
//! `DashMap`, so different lobbies never contend. All mutation is
//! synchronous; nothing here awaits.
//!
//! Entries are evicted once they have no participants, no start or close in
//! flight, and no host pointer other than one cached from the durable record
//! (the next touch reloads that one). Eviction marks the entry as a tombstone under
//! its own lock and only then unlinks it from the map (and only if the map
//! still points at that exact entry). An operation that finds a tombstone
//! unlinks it and retries on a fresh entry, so a join or host assignment
//! racing an eviction is never lost.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arena_core::errors::ArenaError;
use arena_core::ids::{ConnectionId, LobbyId, UserId};
use arena_core::lobby::{LobbyRecord, LobbyStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Match lifecycle as tracked by the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum MatchPhase {
    /// No start accepted yet.
    #[default]
    NotStarted,
    /// A start request is between authorization and broadcast.
    Starting,
    /// The start signal went out (or the durable record says so).
    InProgress,
}

#[derive(Debug, Default)]
struct LobbyState {
    participants: HashMap<UserId, HashSet<ConnectionId>>,
    host: Option<UserId>,
    host_cached: bool,
    status: LobbyStatus,
    phase: MatchPhase,
    closing: bool,
    hydrated: bool,
    evicted: bool,
}

impl LobbyState {
    fn evictable(&self) -> bool {
        self.participants.is_empty()
            && (self.host.is_none() || self.host_cached)
            && self.phase != MatchPhase::Starting
            && !self.closing
    }

    fn hydrate(&mut self, record: &LobbyRecord) {
        self.hydrated = true;
        // closed is terminal; a record read before the close must not reopen it
        if self.status == LobbyStatus::Closed {
            return;
        }
        self.host = match record.status {
            LobbyStatus::Closed => None,
            LobbyStatus::Open | LobbyStatus::InProgress => Some(record.host.clone()),
        };
        self.host_cached = true;
        self.status = record.status;
        if record.status == LobbyStatus::InProgress && self.phase == MatchPhase::NotStarted {
            self.phase = MatchPhase::InProgress;
        }
    }

    fn connection_count(&self) -> usize {
        self.participants.values().map(HashSet::len).sum()
    }
}

/// Result of [`LobbyMembershipStore::remove_connection`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedConnection {
    /// User who owned the connection.
    pub user_id: UserId,
    /// Whether that user has no connections left in the lobby.
    pub user_left: bool,
}

/// Point-in-time view of one lobby entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    /// Lobby.
    pub lobby_id: LobbyId,
    /// Distinct users with at least one connection.
    pub member_count: usize,
    /// Total connections.
    pub connection_count: usize,
    /// Cached host pointer.
    pub host: Option<UserId>,
    /// Cached status.
    pub status: LobbyStatus,
    /// Match phase.
    pub phase: MatchPhase,
}

type Entry = Arc<Mutex<LobbyState>>;

fn insert_connection(
    state: &mut LobbyState,
    user_id: &UserId,
    connection_id: &ConnectionId,
) -> bool {
    let first = !state.participants.contains_key(user_id);
    let _ = state
        .participants
        .entry(user_id.clone())
        .or_default()
        .insert(connection_id.clone());
    first
}

/// Concurrent map of lobby id to lobby state.
#[derive(Default)]
pub struct LobbyMembershipStore {
    lobbies: DashMap<LobbyId, Entry>,
}

impl LobbyMembershipStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the live entry for `lobby_id`, creating it if absent.
    /// Evicts the entry afterwards if `f` left it empty.
    fn with_entry<R>(&self, lobby_id: LobbyId, f: impl FnOnce(&mut LobbyState) -> R) -> R {
        let entry: Entry = Arc::clone(self.lobbies.entry(lobby_id).or_default().value());
        let mut state = entry.lock();
        if state.evicted {
            drop(state);
            self.unlink(lobby_id, &entry);
            return self.with_entry(lobby_id, f);
        }
        let result = f(&mut state);
        if state.evictable() {
            state.evicted = true;
            drop(state);
            self.unlink(lobby_id, &entry);
        }
        result
    }

    /// Run `f` against the entry only if one is live.
    fn with_existing<R>(&self, lobby_id: LobbyId, f: impl FnOnce(&LobbyState) -> R) -> Option<R> {
        let entry: Entry = Arc::clone(self.lobbies.get(&lobby_id)?.value());
        let state = entry.lock();
        if state.evicted {
            return None;
        }
        Some(f(&state))
    }

    fn unlink(&self, lobby_id: LobbyId, entry: &Entry) {
        let _ = self
            .lobbies
            .remove_if(&lobby_id, |_, current| Arc::ptr_eq(current, entry));
    }

    /// Add a user's connection to a lobby. Idempotent.
    ///
    /// Returns `true` when the user was not a participant before.
    pub fn add_connection(
        &self,
        lobby_id: LobbyId,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> bool {
        self.with_entry(lobby_id, |state| insert_connection(state, user_id, connection_id))
    }

    /// Add a connection, hydrating the entry from `record` first if it has
    /// not been yet. Both happen under one lock.
    pub fn join(
        &self,
        record: &LobbyRecord,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> bool {
        self.with_entry(record.lobby_id, |state| {
            if !state.hydrated {
                state.hydrate(record);
            }
            insert_connection(state, user_id, connection_id)
        })
    }

    /// Remove a connection from a lobby. Idempotent.
    ///
    /// Scans every participant for the connection. A user whose connection
    /// set becomes empty is dropped from the lobby.
    pub fn remove_connection(
        &self,
        lobby_id: LobbyId,
        connection_id: &ConnectionId,
    ) -> Option<RemovedConnection> {
        // Do not create an entry just to find nothing in it.
        self.with_existing(lobby_id, |_| ())?;
        self.with_entry(lobby_id, |state| {
            let user_id = state
                .participants
                .iter()
                .find(|(_, conns)| conns.contains(connection_id))
                .map(|(user, _)| user.clone())?;
            let user_left = state.participants.get_mut(&user_id).is_some_and(|conns| {
                let _ = conns.remove(connection_id);
                conns.is_empty()
            });
            if user_left {
                let _ = state.participants.remove(&user_id);
            }
            Some(RemovedConnection { user_id, user_left })
        })
    }

    /// Drop every connection a user holds in a lobby.
    ///
    /// Returns the removed connection ids (empty if the user was absent).
    pub fn remove_user(&self, lobby_id: LobbyId, user_id: &UserId) -> Vec<ConnectionId> {
        if self.with_existing(lobby_id, |_| ()).is_none() {
            return Vec::new();
        }
        self.with_entry(lobby_id, |state| {
            state
                .participants
                .remove(user_id)
                .map(|conns| conns.into_iter().collect())
                .unwrap_or_default()
        })
    }

    /// Whether the user holds at least one connection in the lobby.
    pub fn is_member(&self, lobby_id: LobbyId, user_id: &UserId) -> bool {
        self.with_existing(lobby_id, |state| state.participants.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Whether the cached host pointer names `user_id`.
    ///
    /// Only a broadcast-side cache; authorization reads the durable record.
    pub fn is_host(&self, lobby_id: LobbyId, user_id: &UserId) -> bool {
        self.with_existing(lobby_id, |state| state.host.as_ref() == Some(user_id))
            .unwrap_or(false)
    }

    /// Set (or clear) the host pointer. Last writer wins.
    pub fn set_host(&self, lobby_id: LobbyId, host: Option<UserId>) {
        self.with_entry(lobby_id, |state| {
            state.host = host;
            state.host_cached = false;
        });
    }

    /// Cached host pointer.
    pub fn host(&self, lobby_id: LobbyId) -> Option<UserId> {
        self.with_existing(lobby_id, |state| state.host.clone()).flatten()
    }

    /// Snapshot of every connection in the lobby, taken under the entry lock.
    pub fn get_connections(&self, lobby_id: LobbyId) -> Vec<ConnectionId> {
        self.with_existing(lobby_id, |state| {
            state
                .participants
                .values()
                .flat_map(|conns| conns.iter().cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Distinct users in the lobby.
    pub fn members(&self, lobby_id: LobbyId) -> Vec<UserId> {
        let mut users = self
            .with_existing(lobby_id, |state| state.participants.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Whether the entry has been refreshed from the durable record.
    pub fn is_hydrated(&self, lobby_id: LobbyId) -> bool {
        self.with_existing(lobby_id, |state| state.hydrated)
            .unwrap_or(false)
    }

    /// Refresh the cached host and status from the durable record.
    ///
    /// A durably `InProgress` lobby is marked as such unless a start is
    /// already in flight here. An entry with nobody in it is not kept just
    /// to hold the refreshed cache.
    pub fn refresh_from_record(&self, record: &LobbyRecord) {
        self.with_entry(record.lobby_id, |state| state.hydrate(record));
    }

    /// Cached status.
    pub fn status(&self, lobby_id: LobbyId) -> Option<LobbyStatus> {
        self.with_existing(lobby_id, |state| state.status)
    }

    /// Current match phase (`NotStarted` for unknown lobbies).
    pub fn phase(&self, lobby_id: LobbyId) -> MatchPhase {
        self.with_existing(lobby_id, |state| state.phase)
            .unwrap_or_default()
    }

    /// Refresh from `record`, then move `NotStarted → Starting`.
    ///
    /// Fails with `InvalidState` if a start is already in flight or done, or
    /// the lobby is closed or closing.
    pub fn begin_start(&self, record: &LobbyRecord) -> Result<(), ArenaError> {
        self.with_entry(record.lobby_id, |state| {
            state.hydrate(record);
            if state.closing {
                return Err(ArenaError::invalid_state("Lobby is closing"));
            }
            match (state.status, state.phase) {
                (LobbyStatus::Closed, _) => Err(ArenaError::invalid_state("Lobby is closed")),
                (_, MatchPhase::Starting) => {
                    Err(ArenaError::invalid_state("Match is already starting"))
                }
                (_, MatchPhase::InProgress) => {
                    Err(ArenaError::invalid_state("Match already in progress"))
                }
                (_, MatchPhase::NotStarted) => {
                    state.phase = MatchPhase::Starting;
                    Ok(())
                }
            }
        })
    }

    /// Roll a failed start back to `NotStarted`.
    pub fn abort_start(&self, lobby_id: LobbyId) {
        self.with_entry(lobby_id, |state| {
            if state.phase == MatchPhase::Starting {
                state.phase = MatchPhase::NotStarted;
            }
        });
    }

    /// Move `Starting → InProgress` after the status is persisted.
    pub fn complete_start(&self, lobby_id: LobbyId) {
        self.with_entry(lobby_id, |state| {
            state.phase = MatchPhase::InProgress;
            state.status = LobbyStatus::InProgress;
        });
    }

    /// Fence the lobby against new starts while a close is persisted.
    ///
    /// Fails with `InvalidState` while a start is in flight, so a close can
    /// never be overwritten by that start's `InProgress` write.
    pub fn begin_close(&self, lobby_id: LobbyId) -> Result<(), ArenaError> {
        self.with_entry(lobby_id, |state| {
            if state.phase == MatchPhase::Starting {
                return Err(ArenaError::invalid_state("Match is starting"));
            }
            state.closing = true;
            Ok(())
        })
    }

    /// Lift the close fence. When `closed`, the lobby is marked closed and
    /// the host pointer dropped.
    pub fn finish_close(&self, lobby_id: LobbyId, closed: bool) {
        self.with_entry(lobby_id, |state| {
            state.closing = false;
            if closed {
                state.status = LobbyStatus::Closed;
                state.host = None;
            }
        });
    }

    /// Number of live entries.
    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Summary of every live entry, ordered by lobby id.
    pub fn summaries(&self) -> Vec<LobbySummary> {
        let entries: Vec<(LobbyId, Entry)> = self
            .lobbies
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        let mut out: Vec<LobbySummary> = entries
            .into_iter()
            .filter_map(|(lobby_id, entry)| {
                let state = entry.lock();
                (!state.evicted).then(|| LobbySummary {
                    lobby_id,
                    member_count: state.participants.len(),
                    connection_count: state.connection_count(),
                    host: state.host.clone(),
                    status: state.status,
                    phase: state.phase,
                })
            })
            .collect();
        out.sort_by_key(|s| s.lobby_id);
        out
    }
}
