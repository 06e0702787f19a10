//! GameLink broker binary
//!
//! Publicly reachable side of the tunnel. Binds a player-facing port and a
//! tunnel port, prints a fresh auth key for each agent connection attempt,
//! and relays player traffic over the authenticated tunnel.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use gamelink_broker::{Broker, BrokerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// GameLink broker - exposes a game server behind NAT to the public internet
#[derive(Parser, Debug)]
#[command(name = "gamelink-broker")]
#[command(about = "GameLink broker - accepts players publicly and routes them through the agent tunnel")]
#[command(version)]
#[command(long_about = r#"
The broker listens on two ports: a public one for players and a tunnel one
for the agent running next to the game server. Each agent connection attempt
gets a fresh auth key, printed to this process's log; the agent operator
types it in to attach the tunnel.

EXAMPLES:
  # Defaults: players on 25565, tunnel on 25566
  gamelink-broker

  # Custom ports
  gamelink-broker --public-port 7777 --tunnel-port 7778

ENVIRONMENT VARIABLES:
  GAMELINK_BIND          Address to bind both listeners on
  GAMELINK_PUBLIC_PORT   Port players connect to
  GAMELINK_TUNNEL_PORT   Port the agent dials
"#)]
struct Args {
    /// Address to bind both listeners on
    #[arg(long, env = "GAMELINK_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port players connect to
    #[arg(long, env = "GAMELINK_PUBLIC_PORT", default_value_t = 25565)]
    public_port: u16,

    /// Port the agent dials to attach the tunnel
    #[arg(long, env = "GAMELINK_TUNNEL_PORT", default_value_t = 25566)]
    tunnel_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = BrokerConfig {
        public_addr: SocketAddr::new(args.bind, args.public_port),
        tunnel_addr: SocketAddr::new(args.bind, args.tunnel_port),
    };

    let broker = Broker::bind(config)
        .await
        .context("Failed to start broker")?;
    broker.run().await;

    Ok(())
}
