//! GameLink broker
//!
//! The publicly reachable side of the tunnel: accepts player connections on
//! one port and the agent's tunnel connection on another, multiplexing each
//! player's byte stream over the tunnel tagged by channel id.

pub mod server;

pub use server::{Broker, BrokerConfig, BrokerError};
