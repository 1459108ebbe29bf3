//! Process-local registry of open real-time connections.
//!
//! Each user maps to the set of connection handles they currently hold. The
//! map is a [`DashMap`], so a user's entry is only mutated under its shard
//! lock and distinct users rarely contend. Transports (the WebSocket handler)
//! own the receiving half of each handle and translate [`SessionMessage`]s
//! into frames.
//!
//! Publishing reaches only connections held by this process; there is no
//! cross-process relay.
//!
//! Unread-count snapshots for offline users are buffered until their next
//! attach. The buffer is bounded: snapshots expire after a TTL and a full
//! buffer drops its oldest entries.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use herald_core::notification::Notification;
use herald_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::eviction::evict_oldest;

/// Default lifetime of a buffered unread-count snapshot.
pub const DEFAULT_UNREAD_BUFFER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum number of offline users with a buffered snapshot.
pub const DEFAULT_UNREAD_BUFFER_CAPACITY: usize = 100_000;

/// Identifier of one open connection.
pub type ConnectionId = Uuid;

/// Event pushed to a user's live connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Notification { notification: Box<Notification> },
    UnreadCount { count: i64 },
}

/// Message delivered to a connection's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Event(RealtimeEvent),
    /// Heartbeat; the transport answers with a protocol-level ping.
    Ping,
    /// The registry is shutting down; the transport should close.
    Close,
}

/// Sending half of a connection.
pub type SessionSender = mpsc::UnboundedSender<SessionMessage>;

/// Receiving half of a connection, owned by the transport.
pub type SessionReceiver = mpsc::UnboundedReceiver<SessionMessage>;

/// Result of [`SessionRegistry::attach`].
#[derive(Debug)]
pub struct Attachment {
    pub conn_id: ConnectionId,
    pub receiver: SessionReceiver,
    /// Buffered unread count replayed onto this connection, if any.
    pub replayed_unread_count: Option<i64>,
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Outcome of checking connection credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(DbId),
    Unauthorized(String),
}

/// Synchronous capability check performed before [`SessionRegistry::attach`].
pub trait SessionAuthorizer: Send + Sync {
    fn authorize(&self, credentials: &str) -> Authorization;
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

struct BufferedUnread {
    count: i64,
    buffered_at: Instant,
}

/// Registry of open real-time connections, keyed by user.
///
/// Lock order is `users` then `pending_unread`.
pub struct SessionRegistry {
    users: DashMap<DbId, HashMap<ConnectionId, SessionSender>>,
    /// Latest unread count for users with no open connection.
    pending_unread: DashMap<DbId, BufferedUnread>,
    unread_ttl: Duration,
    unread_capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_unread_buffer(DEFAULT_UNREAD_BUFFER_TTL, DEFAULT_UNREAD_BUFFER_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unread_buffer(ttl: Duration, capacity: usize) -> Self {
        Self {
            users: DashMap::new(),
            pending_unread: DashMap::new(),
            unread_ttl: ttl,
            unread_capacity: capacity.max(1),
        }
    }

    /// Register a new connection for `user_id`.
    ///
    /// On the user's first connection any unexpired buffered unread-count
    /// snapshot is queued onto the new handle before it is returned.
    pub fn attach(&self, user_id: DbId) -> Attachment {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();

        let mut conns = self.users.entry(user_id).or_default();
        let first = conns.is_empty();
        let replayed_unread_count = if first {
            self.pending_unread
                .remove(&user_id)
                .filter(|(_, buffered)| buffered.buffered_at.elapsed() < self.unread_ttl)
                .map(|(_, buffered)| buffered.count)
        } else {
            None
        };
        if let Some(count) = replayed_unread_count {
            let _ = tx.send(SessionMessage::Event(RealtimeEvent::UnreadCount { count }));
        }
        conns.insert(conn_id, tx);
        drop(conns);

        tracing::debug!(user_id, conn_id = %conn_id, first, "Session attached");
        Attachment {
            conn_id,
            receiver: rx,
            replayed_unread_count,
        }
    }

    /// Remove a connection. Users left with no connections are pruned.
    pub fn detach(&self, user_id: DbId, conn_id: ConnectionId) {
        let removed = self
            .users
            .get_mut(&user_id)
            .and_then(|mut conns| conns.remove(&conn_id))
            .is_some();
        self.users.remove_if(&user_id, |_, conns| conns.is_empty());

        if removed {
            tracing::debug!(user_id, conn_id = %conn_id, "Session detached");
        }
    }

    /// Send `event` to every connection of `user_id`.
    ///
    /// Returns the number of connections reached; zero when the user has no
    /// open connection. Handles whose receiver is gone are pruned.
    pub fn publish(&self, user_id: DbId, event: &RealtimeEvent) -> usize {
        let delivered = match self.users.get_mut(&user_id) {
            Some(mut conns) => {
                conns.retain(|_, sender| {
                    sender
                        .send(SessionMessage::Event(event.clone()))
                        .is_ok()
                });
                conns.len()
            }
            None => 0,
        };
        self.users.remove_if(&user_id, |_, conns| conns.is_empty());
        delivered
    }

    /// Push an unread count to the user's connections, or buffer it for
    /// their next attach when they have none.
    ///
    /// The check and the buffering happen under the user's entry, so an
    /// attach cannot slip in between and miss the snapshot.
    pub fn publish_unread_count(&self, user_id: DbId, count: i64) -> usize {
        let event = RealtimeEvent::UnreadCount { count };
        match self.users.entry(user_id) {
            Entry::Occupied(mut conns) => {
                conns
                    .get_mut()
                    .retain(|_, sender| sender.send(SessionMessage::Event(event.clone())).is_ok());
                let reached = conns.get().len();
                if reached == 0 {
                    self.buffer_unread_count(user_id, count);
                    conns.remove();
                }
                reached
            }
            Entry::Vacant(_vacant) => {
                self.buffer_unread_count(user_id, count);
                0
            }
        }
    }

    /// Keep the latest unread count for a user with no open connection; it
    /// is replayed on their next attach unless it expires first.
    pub fn buffer_unread_count(&self, user_id: DbId, count: i64) {
        if self.pending_unread.len() >= self.unread_capacity
            && !self.pending_unread.contains_key(&user_id)
        {
            let evicted = evict_oldest(&self.pending_unread, self.unread_capacity, |b| b.buffered_at);
            tracing::debug!(evicted, capacity = self.unread_capacity, "Unread buffer full");
        }
        self.pending_unread.insert(
            user_id,
            BufferedUnread {
                count,
                buffered_at: Instant::now(),
            },
        );
    }

    /// Drop expired unread snapshots. Returns the number dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.pending_unread.len();
        self.pending_unread
            .retain(|_, buffered| buffered.buffered_at.elapsed() < self.unread_ttl);
        before.saturating_sub(self.pending_unread.len())
    }

    /// Number of offline users with a buffered snapshot.
    pub fn buffered_len(&self) -> usize {
        self.pending_unread.len()
    }

    /// Total open connections across all users.
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|conns| conns.len()).sum()
    }

    pub fn user_connection_count(&self, user_id: DbId) -> usize {
        self.users.get(&user_id).map_or(0, |conns| conns.len())
    }

    pub fn is_online(&self, user_id: DbId) -> bool {
        self.user_connection_count(user_id) > 0
    }

    /// Queue a heartbeat on every connection.
    pub fn ping_all(&self) {
        for conns in self.users.iter() {
            for sender in conns.values() {
                let _ = sender.send(SessionMessage::Ping);
            }
        }
    }

    /// Send Close to every connection and release them all.
    pub fn shutdown_all(&self) {
        let count = self.connection_count();
        for conns in self.users.iter() {
            for sender in conns.values() {
                let _ = sender.send(SessionMessage::Close);
            }
        }
        self.users.clear();
        self.pending_unread.clear();
        tracing::info!(count, "Closed all real-time sessions");
    }
}
