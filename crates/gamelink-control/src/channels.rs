//! Channel table shared by the relay loops

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gamelink_proto::ChannelId;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::SharedWriter;

struct ChannelEntry {
    writer: SharedWriter,
    relay: Option<AbortHandle>,
}

/// A channel taken out of the registry, still holding the abort handle of
/// its relay task. The caller aborts the task after any teardown traffic,
/// which lets a relay task remove its own channel safely.
#[must_use = "abort the relay task after any teardown traffic"]
pub struct RemovedChannel {
    relay: Option<AbortHandle>,
}

impl RemovedChannel {
    pub fn abort_relay(self) {
        if let Some(relay) = self.relay {
            relay.abort();
        }
    }
}

/// Concurrency-safe mapping from channel id to the channel's local
/// connection.
///
/// Inserts come from the accept loop (broker) or the tunnel read loop
/// (agent); removals from relay tasks and both read loops. Removing a
/// channel drops its write half and aborts its relay task, which closes the
/// local socket; removal of an absent channel is a no-op.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
    next_id: AtomicU32,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Allocate the next channel id. Ids start at 1 and are never reused
    /// within a process run.
    pub fn allocate_id(&self) -> ChannelId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a channel's write half, returning the shared handle.
    pub async fn insert(&self, id: ChannelId, writer: OwnedWriteHalf) -> SharedWriter {
        let writer = Arc::new(Mutex::new(writer));
        let mut channels = self.channels.write().await;
        channels.insert(
            id,
            ChannelEntry {
                writer: writer.clone(),
                relay: None,
            },
        );
        writer
    }

    /// Attach the relay task draining this channel's local connection. If
    /// the channel was already removed in the meantime, the task is aborted
    /// immediately.
    pub async fn attach_relay(&self, id: ChannelId, relay: AbortHandle) {
        let mut channels = self.channels.write().await;
        match channels.get_mut(&id) {
            Some(entry) => entry.relay = Some(relay),
            None => relay.abort(),
        }
    }

    /// Look up a channel's write half. The handle is used outside the
    /// registry lock; a stale holder sees write failures once the socket
    /// closes and treats them as its own termination signal.
    pub async fn writer(&self, id: ChannelId) -> Option<SharedWriter> {
        self.channels.read().await.get(&id).map(|e| e.writer.clone())
    }

    pub async fn contains(&self, id: ChannelId) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Remove a channel. Idempotent: returns `None` if it was already gone.
    pub async fn remove(&self, id: ChannelId) -> Option<RemovedChannel> {
        let entry = self.channels.write().await.remove(&id)?;
        debug!(channel_id = id, "channel removed");
        Some(RemovedChannel { relay: entry.relay })
    }

    /// Remove every channel and abort their relay tasks. Used when the
    /// tunnel itself goes away and channel ids stop meaning anything.
    pub async fn drain(&self) -> Vec<ChannelId> {
        let mut channels = self.channels.write().await;
        let ids: Vec<ChannelId> = channels.keys().copied().collect();
        for (_, entry) in channels.drain() {
            if let Some(relay) = entry.relay {
                relay.abort();
            }
        }
        ids
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
