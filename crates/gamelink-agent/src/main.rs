//! GameLink agent binary
//!
//! Runs next to the game server, dials the broker's tunnel port, and prompts
//! for the auth key the broker printed. Reconnects forever on failure.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gamelink_agent::{Agent, AgentConfig, ConsoleKeySource};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_TARGET: &str = "127.0.0.1:25565";

/// GameLink agent - tunnels a local game server out through the broker
#[derive(Parser, Debug)]
#[command(name = "gamelink-agent")]
#[command(about = "GameLink agent - tunnels a local game server out through the broker")]
#[command(version)]
#[command(long_about = r#"
The agent dials the broker's tunnel port and authenticates with the key the
broker printed to its log. Once attached, every player the broker accepts
becomes a connection to the local game server.

EXAMPLES:
  # Connect to a broker, forwarding to the default local server port
  gamelink-agent --broker vds.example.com:25566

  # Explicit local target
  gamelink-agent --broker vds.example.com:25566 --target 127.0.0.1:7777

  # From a config file
  gamelink-agent --config agent.yaml

ENVIRONMENT VARIABLES:
  GAMELINK_BROKER   Broker tunnel address (host:port)
  GAMELINK_TARGET   Local game server address to forward to
"#)]
struct Args {
    /// Broker tunnel address (host:port)
    #[arg(long, env = "GAMELINK_BROKER")]
    broker: Option<String>,

    /// Local game server address to forward channels to
    #[arg(long, env = "GAMELINK_TARGET")]
    target: Option<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    /// Broker configuration
    broker: BrokerSection,

    /// Agent configuration
    #[serde(default)]
    agent: AgentSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct BrokerSection {
    /// Broker tunnel address
    address: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentSection {
    /// Local game server address to forward to
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
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

/// Load configuration from YAML file
fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_agent_config(args: &Args) -> Result<AgentConfig> {
    let (broker, target) = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        let config_file = load_config_file(config_path)?;
        (
            args.broker.clone().or(Some(config_file.broker.address)),
            args.target.clone().or(config_file.agent.target),
        )
    } else {
        (args.broker.clone(), args.target.clone())
    };

    let broker_addr =
        broker.context("No broker address given (use --broker or a config file)")?;
    let target_addr = target.unwrap_or_else(|| DEFAULT_TARGET.to_string());

    Ok(AgentConfig {
        broker_addr,
        target_addr,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = build_agent_config(&args)?;
    info!(
        "Forwarding tunnel channels from {} to {}",
        config.broker_addr, config.target_addr
    );

    let mut agent = Agent::new(config, ConsoleKeySource);
    agent.run().await;

    Ok(())
}
