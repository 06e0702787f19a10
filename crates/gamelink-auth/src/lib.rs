//! Tunnel authentication
//!
//! Key generation and the handshake exchange that gates use of the tunnel
//! link. The broker issues a fresh single-use key per connection attempt;
//! the agent answers with whatever the operator typed in.

pub mod handshake;
pub mod key;

pub use handshake::{issue_key, respond_with_key, HandshakeError, KeySource, AUTH_TIMEOUT};
pub use key::generate_key;
