//! The handshake exchange
//!
//! Sequence: broker sends `AuthKey(key)`, agent answers `AuthKey(operator
//! input)`, broker replies `AuthResponse(1)` on a match or `AuthResponse(0)`
//! and closes. Both sides bound the whole conversation with one deadline;
//! steady-state relaying afterwards has none.

use std::time::Duration;

use async_trait::async_trait;
use gamelink_proto::{read_packet, write_packet, CodecError, Packet, PacketType};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

/// Deadline on the whole authentication exchange, either side.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Codec error during handshake: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected {0:?} packet during handshake")]
    UnexpectedPacket(PacketType),

    #[error("Auth key mismatch")]
    KeyMismatch,

    #[error("Broker rejected the auth key")]
    Rejected,

    #[error("Authentication timed out")]
    TimedOut,

    #[error("Failed to read auth key input: {0}")]
    KeyInput(#[source] std::io::Error),
}

/// Source of the operator-entered auth key on the agent side. Asked once
/// per (re)connection attempt, after the broker's challenge arrives.
#[async_trait]
pub trait KeySource: Send {
    async fn key(&mut self) -> std::io::Result<String>;
}

/// Broker side: send the generated key, require it echoed back, and answer
/// with the verdict.
pub async fn issue_key<S>(stream: &mut S, auth_key: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    timeout(AUTH_TIMEOUT, issue(stream, auth_key))
        .await
        .map_err(|_| HandshakeError::TimedOut)?
}

async fn issue<S>(stream: &mut S, auth_key: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    write_packet(stream, &Packet::auth_key(auth_key.as_bytes().to_vec())).await?;

    let reply = read_packet(stream).await?;
    if reply.packet_type != PacketType::AuthKey {
        write_packet(stream, &Packet::auth_response(false)).await?;
        return Err(HandshakeError::UnexpectedPacket(reply.packet_type));
    }
    if reply.data != auth_key.as_bytes() {
        debug!("presented key does not match the issued key");
        write_packet(stream, &Packet::auth_response(false)).await?;
        return Err(HandshakeError::KeyMismatch);
    }

    write_packet(stream, &Packet::auth_response(true)).await?;
    Ok(())
}

/// Agent side: receive the broker's challenge, collect the operator's key,
/// and send it back for verification. Surrounding whitespace is trimmed.
pub async fn respond_with_key<S, K>(stream: &mut S, source: &mut K) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    K: KeySource + ?Sized,
{
    timeout(AUTH_TIMEOUT, respond(stream, source))
        .await
        .map_err(|_| HandshakeError::TimedOut)?
}

async fn respond<S, K>(stream: &mut S, source: &mut K) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    K: KeySource + ?Sized,
{
    let challenge = read_packet(stream).await?;
    if challenge.packet_type != PacketType::AuthKey {
        return Err(HandshakeError::UnexpectedPacket(challenge.packet_type));
    }

    let entered = source.key().await.map_err(HandshakeError::KeyInput)?;
    let entered = entered.trim();
    write_packet(stream, &Packet::auth_key(entered.as_bytes().to_vec())).await?;

    let reply = read_packet(stream).await?;
    if reply.packet_type != PacketType::AuthResponse {
        return Err(HandshakeError::UnexpectedPacket(reply.packet_type));
    }
    if !reply.is_auth_success() {
        return Err(HandshakeError::Rejected);
    }
    Ok(())
}
