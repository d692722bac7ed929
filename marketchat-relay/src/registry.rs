//! Connection registry: the single live channel per user identity.
//!
//! The registry maps a `UserId` to the outbound channel of its most recent
//! connection. Registering a second channel for the same identity supersedes
//! the first without force-closing it — dropping the superseded sender ends
//! that connection's writer task, and the old connection's own teardown
//! becomes a no-op because its [`ChannelId`] no longer matches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use marketchat_proto::message::UserId;
use tokio::sync::{RwLock, mpsc};

/// Default capacity of the bounded per-channel outbound queue.
const DEFAULT_QUEUE_SIZE: usize = 64;

/// Process-unique identifier of one live channel.
///
/// Lets a connection's teardown prove it still owns the registry entry, so a
/// stale deregister after a fast reconnect cannot clobber the newer
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a push onto a live channel does not go through.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The bounded outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The receiving connection has gone away.
    #[error("channel closed")]
    Closed,
}

/// The sending half of one connection's outbound queue.
///
/// Cloneable; all clones share the same [`ChannelId`] and underlying queue.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::Sender<Message>,
}

impl ChannelHandle {
    /// Returns this channel's process-unique id.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Enqueues a WebSocket message without blocking.
    ///
    /// A slow or gone receiver must never stall the caller, so the queue is
    /// bounded and overflow drops the frame.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::QueueFull`] or [`PushError::Closed`]; either way
    /// the frame was not enqueued.
    pub fn push(&self, msg: Message) -> Result<(), PushError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// In-memory map from user identity to its single live channel.
///
/// Thread-safe via [`RwLock`]. All operations are O(1) amortized and never
/// hold the lock across I/O.
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<UserId, ChannelHandle>>,
    next_channel_id: AtomicU64,
    queue_size: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry with the default outbound queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_size(DEFAULT_QUEUE_SIZE)
    }

    /// Creates an empty registry with a custom outbound queue capacity.
    #[must_use]
    pub fn with_queue_size(queue_size: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_channel_id: AtomicU64::new(1),
            queue_size: queue_size.max(1),
        }
    }

    /// Allocates a fresh channel with a process-unique id.
    ///
    /// Returns the handle to register plus the receiving half for the
    /// connection's writer task.
    #[must_use]
    pub fn open_channel(&self) -> (ChannelHandle, mpsc::Receiver<Message>) {
        let id = ChannelId(self.next_channel_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_size);
        (ChannelHandle { id, tx }, rx)
    }

    /// Registers a channel for `user`, superseding any previous one.
    ///
    /// Returns the superseded handle if a prior channel existed. The registry
    /// does not close the old channel; dropping the returned handle (and the
    /// map's copy) lets the old writer task observe closure on its own.
    pub async fn register(&self, user: UserId, handle: ChannelHandle) -> Option<ChannelHandle> {
        let mut channels = self.channels.write().await;
        channels.insert(user, handle)
    }

    /// Removes the mapping for `user` only if it still holds `channel_id`.
    ///
    /// A teardown racing a fast reconnect would otherwise clobber the newer
    /// registration. Returns `true` if the entry was removed.
    pub async fn deregister(&self, user: UserId, channel_id: ChannelId) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(&user) {
            Some(handle) if handle.id == channel_id => {
                channels.remove(&user);
                true
            }
            _ => false,
        }
    }

    /// Returns a clone of the live channel for `user`, if any.
    pub async fn lookup(&self, user: UserId) -> Option<ChannelHandle> {
        let channels = self.channels.read().await;
        channels.get(&user).cloned()
    }
}
