//! Broker server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use gamelink_auth::{generate_key, issue_key};
use gamelink_control::{ChannelRegistry, SharedWriter, TunnelSlot};
use gamelink_proto::{is_disconnect, read_packet, write_packet, ChannelId, Packet, PacketType};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Buffer size for relay reads from player connections.
const RELAY_BUF_SIZE: usize = 8192;

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nCheck whether another process is using port {port}: lsof -i :{port}")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address players connect to.
    pub public_addr: SocketAddr,
    /// Address the agent dials to attach the tunnel.
    pub tunnel_addr: SocketAddr,
}

/// Tunnel broker: one public listener for players, one listener for the
/// agent's tunnel connection, a shared channel table between them.
pub struct Broker {
    public_listener: TcpListener,
    tunnel_listener: TcpListener,
    public_addr: SocketAddr,
    tunnel_addr: SocketAddr,
    registry: Arc<ChannelRegistry>,
    tunnel: Arc<TunnelSlot>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("public_addr", &self.public_addr)
            .field("tunnel_addr", &self.tunnel_addr)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Bind both listeners. This is the only fatal failure path; everything
    /// after it is contained to a channel or a tunnel session.
    pub async fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let public_listener = bind_listener(config.public_addr).await?;
        let tunnel_listener = bind_listener(config.tunnel_addr).await?;
        let public_addr = public_listener.local_addr()?;
        let tunnel_addr = tunnel_listener.local_addr()?;

        info!("Public listener on {}", public_addr);
        info!("Waiting for tunnel connection on {}", tunnel_addr);

        Ok(Self {
            public_listener,
            tunnel_listener,
            public_addr,
            tunnel_addr,
            registry: Arc::new(ChannelRegistry::new()),
            tunnel: Arc::new(TunnelSlot::new()),
        })
    }

    /// Address of the public listener, after ephemeral port resolution.
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// Address of the tunnel listener, after ephemeral port resolution.
    pub fn tunnel_addr(&self) -> SocketAddr {
        self.tunnel_addr
    }

    /// Run both accept loops. Never returns short of process exit.
    pub async fn run(self) {
        let Broker {
            public_listener,
            tunnel_listener,
            registry,
            tunnel,
            ..
        } = self;

        tokio::join!(
            run_public_listener(public_listener, registry.clone(), tunnel.clone()),
            run_tunnel_listener(tunnel_listener, registry, tunnel),
        );
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, BrokerError> {
    TcpListener::bind(addr).await.map_err(|e| BrokerError::BindError {
        address: addr.ip().to_string(),
        port: addr.port(),
        reason: e.to_string(),
    })
}

/// Accept player connections and hand each a fresh channel.
async fn run_public_listener(
    listener: TcpListener,
    registry: Arc<ChannelRegistry>,
    tunnel: Arc<TunnelSlot>,
) {
    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to accept player connection: {}", e);
                continue;
            }
        };

        // Without a tunnel there is nowhere to route this player.
        if !tunnel.is_attached().await {
            debug!("No tunnel attached, dropping player {}", peer_addr);
            drop(socket);
            continue;
        }

        let channel_id = registry.allocate_id();
        info!(channel_id, "Player connected from {}", peer_addr);

        let (read_half, write_half) = socket.into_split();
        registry.insert(channel_id, write_half).await;

        let task = tokio::spawn(relay_player(
            channel_id,
            read_half,
            registry.clone(),
            tunnel.clone(),
        ));
        registry.attach_relay(channel_id, task.abort_handle()).await;
    }
}

/// Read player bytes and frame them onto the current tunnel.
async fn relay_player(
    channel_id: ChannelId,
    mut read_half: OwnedReadHalf,
    registry: Arc<ChannelRegistry>,
    tunnel: Arc<TunnelSlot>,
) {
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(channel_id, "Player disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                if is_disconnect(&e) {
                    debug!(channel_id, "Player connection closed: {}", e);
                } else {
                    warn!(channel_id, "Player read error: {}", e);
                }
                break;
            }
        };

        let Some(writer) = tunnel.current_writer().await else {
            debug!(channel_id, "Tunnel detached, dropping player");
            break;
        };

        let packet = Packet::data(channel_id, buf[..n].to_vec());
        let mut writer = writer.lock().await;
        if let Err(e) = write_packet(&mut *writer, &packet).await {
            warn!(channel_id, "Tunnel write failed: {}", e);
            break;
        }
    }

    remove_channel(&registry, &tunnel, channel_id).await;
}

/// Remove a channel and tell the agent to release its matching local
/// connection. The relay abort runs last so a relay task may remove its own
/// channel and still get the notification out.
async fn remove_channel(
    registry: &ChannelRegistry,
    tunnel: &TunnelSlot,
    channel_id: ChannelId,
) {
    let Some(removed) = registry.remove(channel_id).await else {
        return;
    };

    if let Some(writer) = tunnel.current_writer().await {
        let mut writer = writer.lock().await;
        if let Err(e) = write_packet(&mut *writer, &Packet::channel_closed(channel_id)).await {
            debug!(channel_id, "Channel-closed notification failed: {}", e);
        }
    }

    removed.abort_relay();
}

/// Accept tunnel connection attempts, handshaking each one in turn. Only
/// the handshake is serialized; an authenticated session's read loop runs
/// as its own task so a replacement agent can still get through.
async fn run_tunnel_listener(
    listener: TcpListener,
    registry: Arc<ChannelRegistry>,
    tunnel: Arc<TunnelSlot>,
) {
    loop {
        let (mut socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to accept tunnel connection: {}", e);
                continue;
            }
        };
        info!("Tunnel connection attempt from {}", peer_addr);

        let auth_key = generate_key();
        info!("Auth key for {}: {}", peer_addr, auth_key);

        if let Err(e) = issue_key(&mut socket, &auth_key).await {
            warn!("Tunnel authentication failed for {}: {}", peer_addr, e);
            continue;
        }
        info!("Tunnel authenticated for {}", peer_addr);

        let (read_half, write_half) = socket.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(write_half));
        let (session_id, replaced) = tunnel.attach(writer).await;

        // The new session takes over before it routes anything: the old
        // physical connection goes away and its channel ids with it.
        if let Some(old) = replaced {
            info!("Replacing tunnel session {}", old.id);
            old.abort_reader();
            let orphaned = registry.drain().await;
            if !orphaned.is_empty() {
                debug!("Dropped {} channels from the replaced tunnel", orphaned.len());
            }
        }

        let task = tokio::spawn(run_tunnel_session(
            session_id,
            read_half,
            registry.clone(),
            tunnel.clone(),
        ));
        tunnel.attach_reader(session_id, task.abort_handle()).await;
    }
}

/// Read loop over one authenticated tunnel connection.
async fn run_tunnel_session(
    session_id: u64,
    mut read_half: OwnedReadHalf,
    registry: Arc<ChannelRegistry>,
    tunnel: Arc<TunnelSlot>,
) {
    loop {
        let packet = match read_packet(&mut read_half).await {
            Ok(packet) => packet,
            Err(e) => {
                if e.is_disconnect() {
                    info!("Tunnel closed by agent");
                } else {
                    warn!("Tunnel read error: {}", e);
                }
                break;
            }
        };

        match packet.packet_type {
            PacketType::TunnelData => {
                // Absent channel means the player is already gone; the
                // broker never creates player connections, so the packet is
                // dropped.
                let Some(writer) = registry.writer(packet.channel_id).await else {
                    continue;
                };
                let mut writer = writer.lock().await;
                if let Err(e) = writer.write_all(&packet.data).await {
                    drop(writer);
                    warn!(channel_id = packet.channel_id, "Player write failed: {}", e);
                    remove_channel(&registry, &tunnel, packet.channel_id).await;
                }
            }
            PacketType::ChannelClosed => {
                debug!(channel_id = packet.channel_id, "Channel closed by agent");
                remove_channel(&registry, &tunnel, packet.channel_id).await;
            }
            other => {
                warn!("Unexpected {:?} packet on tunnel", other);
            }
        }
    }

    // Clear the slot before draining so removals stop notifying a dead
    // link. A replaced session fails the detach and leaves its replacement
    // alone.
    if tunnel.detach_if(session_id).await {
        let orphaned = registry.drain().await;
        info!(
            "Tunnel session {} ended, dropped {} channels",
            session_id,
            orphaned.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reports_addresses() {
        let config = BrokerConfig {
            public_addr: "127.0.0.1:0".parse().unwrap(),
            tunnel_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let broker = Broker::bind(config).await.unwrap();
        assert_ne!(broker.public_addr().port(), 0);
        assert_ne!(broker.tunnel_addr().port(), 0);
        assert_ne!(broker.public_addr(), broker.tunnel_addr());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = BrokerConfig {
            public_addr: occupied.local_addr().unwrap(),
            tunnel_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let err = Broker::bind(config).await.unwrap_err();
        assert!(matches!(err, BrokerError::BindError { .. }));
    }
}
