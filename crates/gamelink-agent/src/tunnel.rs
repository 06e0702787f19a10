//! Agent connection loop and channel relaying

use std::sync::Arc;
use std::time::Duration;

use gamelink_auth::{respond_with_key, HandshakeError, KeySource};
use gamelink_control::{ChannelRegistry, SharedWriter};
use gamelink_proto::{is_disconnect, read_packet, write_packet, ChannelId, Packet, PacketType};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Pause between reconnection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Buffer size for relay reads from the local game server.
const RELAY_BUF_SIZE: usize = 8192;

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to connect to broker at {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Authentication failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker tunnel address to dial.
    pub broker_addr: String,
    /// Local game server address each channel connects to.
    pub target_addr: String,
}

/// Tunnel agent: dials the broker, authenticates, and relays every channel
/// to the local game server.
pub struct Agent<K> {
    config: AgentConfig,
    key_source: K,
    registry: Arc<ChannelRegistry>,
}

impl<K: KeySource> Agent<K> {
    pub fn new(config: AgentConfig, key_source: K) -> Self {
        Self {
            config,
            key_source,
            registry: Arc::new(ChannelRegistry::new()),
        }
    }

    /// Connect, authenticate, relay, reconnect. Loops until process exit;
    /// every failure path funnels back through the fixed backoff.
    pub async fn run(&mut self) {
        loop {
            match self.run_once().await {
                Ok(()) => info!(
                    "Tunnel connection lost, reconnecting in {}s",
                    RECONNECT_BACKOFF.as_secs()
                ),
                Err(e) => warn!("{}; retrying in {}s", e, RECONNECT_BACKOFF.as_secs()),
            }
            sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// One full connection cycle: dial, authenticate, relay until the
    /// tunnel fails. Channels are drained before returning.
    pub async fn run_once(&mut self) -> Result<(), AgentError> {
        let mut stream = TcpStream::connect(&self.config.broker_addr)
            .await
            .map_err(|source| AgentError::ConnectionFailed {
                address: self.config.broker_addr.clone(),
                source,
            })?;
        info!("Connected to broker at {}", self.config.broker_addr);

        respond_with_key(&mut stream, &mut self.key_source).await?;
        info!("Tunnel authenticated");

        let (read_half, write_half) = stream.into_split();
        let tunnel_writer: SharedWriter = Arc::new(Mutex::new(write_half));

        self.relay(read_half, tunnel_writer).await;

        // Channel ids mean nothing without the tunnel that carried them.
        let orphaned = self.registry.drain().await;
        if !orphaned.is_empty() {
            debug!("Dropped {} channels with the tunnel", orphaned.len());
        }
        Ok(())
    }

    /// Read loop over the tunnel connection, fanning packets out to their
    /// channels.
    async fn relay(&self, mut read_half: OwnedReadHalf, tunnel_writer: SharedWriter) {
        loop {
            let packet = match read_packet(&mut read_half).await {
                Ok(packet) => packet,
                Err(e) => {
                    if e.is_disconnect() {
                        info!("Broker closed the tunnel");
                    } else {
                        warn!("Tunnel read error: {}", e);
                    }
                    return;
                }
            };

            match packet.packet_type {
                PacketType::TunnelData => self.handle_data(packet, &tunnel_writer).await,
                PacketType::ChannelClosed => {
                    debug!(channel_id = packet.channel_id, "Channel closed by broker");
                    if let Some(removed) = self.registry.remove(packet.channel_id).await {
                        removed.abort_relay();
                    }
                }
                other => {
                    warn!("Unexpected {:?} packet on tunnel", other);
                }
            }
        }
    }

    /// Deliver one `TunnelData` payload, dialing the game server lazily on
    /// the first sight of a channel id.
    async fn handle_data(&self, packet: Packet, tunnel_writer: &SharedWriter) {
        let channel_id = packet.channel_id;

        let writer = match self.registry.writer(channel_id).await {
            Some(writer) => writer,
            None => {
                let socket = match TcpStream::connect(&self.config.target_addr).await {
                    Ok(socket) => socket,
                    Err(e) => {
                        // Drop the packet; the broker learns through its own
                        // IO, not from us.
                        warn!(
                            channel_id,
                            "Game server unreachable at {}: {}", self.config.target_addr, e
                        );
                        return;
                    }
                };
                info!(
                    channel_id,
                    "Opened local connection to {}", self.config.target_addr
                );

                let (read_half, write_half) = socket.into_split();
                let writer = self.registry.insert(channel_id, write_half).await;
                let task = tokio::spawn(relay_local(
                    channel_id,
                    read_half,
                    tunnel_writer.clone(),
                    self.registry.clone(),
                ));
                self.registry
                    .attach_relay(channel_id, task.abort_handle())
                    .await;
                writer
            }
        };

        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_all(&packet.data).await {
            drop(writer);
            warn!(channel_id, "Game server write failed: {}", e);
            if let Some(removed) = self.registry.remove(channel_id).await {
                removed.abort_relay();
            }
        }
    }
}

/// Read game-server bytes for one channel and frame them onto the tunnel.
async fn relay_local(
    channel_id: ChannelId,
    mut read_half: OwnedReadHalf,
    tunnel_writer: SharedWriter,
    registry: Arc<ChannelRegistry>,
) {
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(channel_id, "Game server closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                if is_disconnect(&e) {
                    debug!(channel_id, "Local connection closed: {}", e);
                } else {
                    warn!(channel_id, "Game server read error: {}", e);
                }
                break;
            }
        };

        let packet = Packet::data(channel_id, buf[..n].to_vec());
        let mut writer = tunnel_writer.lock().await;
        if let Err(e) = write_packet(&mut *writer, &packet).await {
            warn!(channel_id, "Tunnel write failed: {}", e);
            break;
        }
    }

    if let Some(removed) = registry.remove(channel_id).await {
        removed.abort_relay();
    }
}
