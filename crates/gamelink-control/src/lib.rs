//! Shared connection state for the relay loops
//!
//! Both sides of the tunnel mutate a channel table from several tasks at
//! once; this crate owns that state and the current-tunnel slot so neither
//! lives in ambient globals.

pub mod channels;
pub mod session;

pub use channels::{ChannelRegistry, RemovedChannel};
pub use session::{TunnelSession, TunnelSlot};

use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Write half of a connection, shared between the relay loops. A handle is
/// never replaced after creation, only removed with its channel or session.
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;
