//! Current-tunnel slot

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::SharedWriter;

/// An authenticated tunnel connection. At most one session is current per
/// broker at a time; the session id tells a dying read loop whether it is
/// still the one being routed through.
pub struct TunnelSession {
    pub id: u64,
    pub writer: SharedWriter,
    reader: Option<AbortHandle>,
}

impl TunnelSession {
    /// Abort the session's read-loop task. Called by the replacer when a
    /// newly authenticated tunnel takes over.
    pub fn abort_reader(&self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// Holder of the single current tunnel session, read by every relay task on
/// every write so replacement is observed promptly.
pub struct TunnelSlot {
    current: RwLock<Option<TunnelSession>>,
    next_id: AtomicU64,
}

impl TunnelSlot {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attach a freshly authenticated tunnel connection. Returns the new
    /// session id and whatever session it replaced; tearing the old one
    /// down is the caller's job.
    pub async fn attach(&self, writer: SharedWriter) -> (u64, Option<TunnelSession>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut current = self.current.write().await;
        let replaced = current.replace(TunnelSession {
            id,
            writer,
            reader: None,
        });
        debug!(session_id = id, replaced = replaced.is_some(), "tunnel attached");
        (id, replaced)
    }

    /// Register the session's read-loop task so a later replacement can
    /// abort it. If the session was already replaced, the task is aborted
    /// immediately.
    pub async fn attach_reader(&self, session_id: u64, reader: AbortHandle) {
        let mut current = self.current.write().await;
        match current.as_mut() {
            Some(session) if session.id == session_id => session.reader = Some(reader),
            _ => reader.abort(),
        }
    }

    /// The current tunnel's write half, if one is attached.
    pub async fn current_writer(&self) -> Option<SharedWriter> {
        self.current.read().await.as_ref().map(|s| s.writer.clone())
    }

    pub async fn is_attached(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Clear the slot only if the given session is still current. A
    /// replaced session must never tear down its replacement.
    pub async fn detach_if(&self, session_id: u64) -> bool {
        let mut current = self.current.write().await;
        match current.as_ref() {
            Some(session) if session.id == session_id => {
                *current = None;
                debug!(session_id, "tunnel detached");
                true
            }
            _ => false,
        }
    }
}

impl Default for TunnelSlot {
    fn default() -> Self {
        Self::new()
    }
}
