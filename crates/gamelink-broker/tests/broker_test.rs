//! End-to-end broker tests driving real sockets with a scripted agent.

use std::net::SocketAddr;
use std::time::Duration;

use gamelink_broker::{Broker, BrokerConfig};
use gamelink_proto::{read_packet, write_packet, ChannelId, Packet, PacketType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

async fn start_broker() -> (SocketAddr, SocketAddr) {
    let config = BrokerConfig {
        public_addr: "127.0.0.1:0".parse().unwrap(),
        tunnel_addr: "127.0.0.1:0".parse().unwrap(),
    };
    let broker = Broker::bind(config).await.unwrap();
    let addrs = (broker.public_addr(), broker.tunnel_addr());
    tokio::spawn(broker.run());
    addrs
}

/// Scripted agent: handshake by echoing the key the broker just sent.
async fn attach_agent(tunnel_addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(tunnel_addr).await.unwrap();

    let challenge = read_packet(&mut stream).await.unwrap();
    assert_eq!(challenge.packet_type, PacketType::AuthKey);
    write_packet(&mut stream, &Packet::auth_key(challenge.data.clone()))
        .await
        .unwrap();

    let verdict = read_packet(&mut stream).await.unwrap();
    assert!(verdict.is_auth_success());

    // Give the broker a beat to publish the session before players arrive.
    sleep(SETTLE).await;
    stream
}

/// Collect `TunnelData` payload bytes for one channel until `len` bytes
/// arrived, skipping traffic for other channels.
async fn read_channel_data(stream: &mut TcpStream, channel_id: ChannelId, len: usize) -> Vec<u8> {
    let mut collected = Vec::with_capacity(len);
    while collected.len() < len {
        let packet = timeout(WAIT, read_packet(stream)).await.unwrap().unwrap();
        if packet.packet_type == PacketType::TunnelData && packet.channel_id == channel_id {
            collected.extend_from_slice(&packet.data);
        }
    }
    collected
}

/// Wait for a `ChannelClosed` for the given channel, skipping other traffic.
async fn expect_channel_closed(stream: &mut TcpStream, channel_id: ChannelId) {
    loop {
        let packet = timeout(WAIT, read_packet(stream)).await.unwrap().unwrap();
        if packet.packet_type == PacketType::ChannelClosed && packet.channel_id == channel_id {
            return;
        }
    }
}

#[tokio::test]
async fn test_player_rejected_without_tunnel() {
    let (public_addr, _tunnel_addr) = start_broker().await;

    let mut player = TcpStream::connect(public_addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, player.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "player should be closed immediately with no tunnel");
}

#[tokio::test]
async fn test_wrong_key_rejected() {
    let (_public_addr, tunnel_addr) = start_broker().await;

    let mut stream = TcpStream::connect(tunnel_addr).await.unwrap();
    let challenge = read_packet(&mut stream).await.unwrap();
    assert_eq!(challenge.packet_type, PacketType::AuthKey);

    write_packet(&mut stream, &Packet::auth_key(b"WRONG1".as_slice()))
        .await
        .unwrap();

    let verdict = read_packet(&mut stream).await.unwrap();
    assert_eq!(verdict.packet_type, PacketType::AuthResponse);
    assert!(!verdict.is_auth_success());

    // The broker closes the connection after a failed handshake.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_end_to_end_relay() {
    let (public_addr, tunnel_addr) = start_broker().await;
    let mut agent = attach_agent(tunnel_addr).await;

    let mut player = TcpStream::connect(public_addr).await.unwrap();
    let request = vec![0x5Au8; 100];
    player.write_all(&request).await.unwrap();

    // First player gets channel id 1; its bytes come through verbatim.
    let relayed = read_channel_data(&mut agent, 1, 100).await;
    assert_eq!(relayed, request);

    // The return path delivers exactly what the agent frames back.
    let reply = vec![0xC3u8; 50];
    write_packet(&mut agent, &Packet::data(1, reply.clone()))
        .await
        .unwrap();

    let mut received = vec![0u8; 50];
    timeout(WAIT, player.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, reply);
}

#[tokio::test]
async fn test_channel_closed_on_player_disconnect() {
    let (public_addr, tunnel_addr) = start_broker().await;
    let mut agent = attach_agent(tunnel_addr).await;

    let mut player = TcpStream::connect(public_addr).await.unwrap();
    player.write_all(b"ping").await.unwrap();
    assert_eq!(read_channel_data(&mut agent, 1, 4).await, b"ping");

    drop(player);
    expect_channel_closed(&mut agent, 1).await;
}

#[tokio::test]
async fn test_channel_isolation() {
    let (public_addr, tunnel_addr) = start_broker().await;
    let mut agent = attach_agent(tunnel_addr).await;

    let mut player_a = TcpStream::connect(public_addr).await.unwrap();
    player_a.write_all(b"aaaa").await.unwrap();
    assert_eq!(read_channel_data(&mut agent, 1, 4).await, b"aaaa");

    let mut player_b = TcpStream::connect(public_addr).await.unwrap();
    player_b.write_all(b"bbbb").await.unwrap();
    assert_eq!(read_channel_data(&mut agent, 2, 4).await, b"bbbb");

    // Killing A must not disturb B in either direction.
    drop(player_a);
    expect_channel_closed(&mut agent, 1).await;

    player_b.write_all(b"more").await.unwrap();
    assert_eq!(read_channel_data(&mut agent, 2, 4).await, b"more");

    write_packet(&mut agent, &Packet::data(2, b"back".as_slice()))
        .await
        .unwrap();
    let mut received = vec![0u8; 4];
    timeout(WAIT, player_b.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"back");
}

#[tokio::test]
async fn test_tunnel_replacement() {
    let (public_addr, tunnel_addr) = start_broker().await;
    let mut first_agent = attach_agent(tunnel_addr).await;

    let mut player = TcpStream::connect(public_addr).await.unwrap();
    player.write_all(b"one").await.unwrap();
    assert_eq!(read_channel_data(&mut first_agent, 1, 3).await, b"one");

    // A second agent authenticates; the first tunnel and its channels go.
    let mut second_agent = attach_agent(tunnel_addr).await;

    let first_read = timeout(WAIT, read_packet(&mut first_agent)).await.unwrap();
    assert!(first_read.is_err(), "replaced tunnel should be closed");

    let mut buf = [0u8; 16];
    let n = timeout(WAIT, player.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "channels of the replaced tunnel should be closed");

    // New players route through the replacement with a fresh id.
    let mut next_player = TcpStream::connect(public_addr).await.unwrap();
    next_player.write_all(b"two").await.unwrap();
    assert_eq!(read_channel_data(&mut second_agent, 2, 3).await, b"two");
}

#[tokio::test]
async fn test_data_for_unknown_channel_is_dropped() {
    let (public_addr, tunnel_addr) = start_broker().await;
    let mut agent = attach_agent(tunnel_addr).await;

    // The broker never creates player connections on demand.
    write_packet(&mut agent, &Packet::data(99, b"nobody home".as_slice()))
        .await
        .unwrap();

    // The session survives and keeps routing real traffic.
    let mut player = TcpStream::connect(public_addr).await.unwrap();
    player.write_all(b"ping").await.unwrap();
    assert_eq!(read_channel_data(&mut agent, 1, 4).await, b"ping");
}
