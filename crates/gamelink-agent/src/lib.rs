//! GameLink agent
//!
//! Runs next to the game server behind NAT. Dials the broker's tunnel port,
//! authenticates with the operator-entered key, then demultiplexes tunnel
//! traffic into lazily-dialed connections to the local game server.

pub mod console;
pub mod tunnel;

pub use console::ConsoleKeySource;
pub use tunnel::{Agent, AgentConfig, AgentError, RECONNECT_BACKOFF};
