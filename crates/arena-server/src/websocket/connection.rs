//! WebSocket client connection state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arena_core::ids::{ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::group::Group;

/// Groups joined by a connection, plus whether it has been torn down.
#[derive(Debug, Default)]
struct Membership {
    groups: BTreeSet<Group>,
    closed: bool,
}

/// One live real-time channel bound to one authenticated user.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated user on the other end.
    pub user_id: UserId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full or closed channel.
    pub dropped_messages: AtomicU64,
    membership: Mutex<Membership>,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            membership: Mutex::new(Membership::default()),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Never blocks. Returns `false` if the queue is full or closed, and
    /// increments the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Record `group` and run `attach` while the membership lock is held.
    ///
    /// `attach` receives `true` when the group was newly added. Returns `None`
    /// without calling `attach` once the connection is closed, so a join that
    /// races a disconnect can never leave a stale group entry behind.
    pub fn attach<R>(&self, group: Group, attach: impl FnOnce(bool) -> R) -> Option<R> {
        let mut m = self.membership.lock();
        if m.closed {
            return None;
        }
        let added = m.groups.insert(group);
        Some(attach(added))
    }

    /// Forget `group` and run `detach` while the membership lock is held.
    ///
    /// `detach` receives `true` when the group was present.
    pub fn detach<R>(&self, group: Group, detach: impl FnOnce(bool) -> R) -> R {
        let mut m = self.membership.lock();
        let removed = m.groups.remove(&group);
        detach(removed)
    }

    /// Whether the connection currently holds `group`.
    pub fn in_group(&self, group: Group) -> bool {
        self.membership.lock().groups.contains(&group)
    }

    /// Snapshot of held groups.
    pub fn groups(&self) -> Vec<Group> {
        self.membership.lock().groups.iter().copied().collect()
    }

    /// Mark the connection closed and drain its groups.
    ///
    /// Idempotent: the second call returns an empty list.
    pub fn close(&self) -> Vec<Group> {
        let mut m = self.membership.lock();
        m.closed = true;
        std::mem::take(&mut m.groups).into_iter().collect()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.membership.lock().closed
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}
