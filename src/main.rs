//! Edgelink Agent - network edge agent CLI
//!
//! Runs the task-driven engines of the edge agent: the UDP NAT-probe
//! engine and the bandwidth measurement engine, fed with task JSON
//! messages delivered over the control channel (one JSON document per
//! line on stdin).

mod dispatch;
mod token;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edgelink_bandwidth::BandwidthService;
use edgelink_probe::{UdpProbe, DEFAULT_PROBE_PORT};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::token::StaticTokens;

/// Edgelink agent - NAT probing and bandwidth proving for edge nodes
#[derive(Parser, Debug)]
#[command(name = "edgelink")]
#[command(about = "Edgelink agent - NAT probing and bandwidth proving for edge nodes")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(long_about = r#"
The Edgelink agent consumes task messages from its control channel (one
JSON document per line on stdin), probes NAT reachability against checker
nodes, and proves outbound throughput with authenticated upload streams.

EXAMPLES:
  # Run with an explicit node identity and upload credential
  edgelink --node-id node-7f3a --bearer-token $TOKEN

  # Run from a config file
  edgelink --config agent-config.yaml

  # Custom probe port and verbose logging
  edgelink --probe-port 53001 --log-level debug

ENVIRONMENT VARIABLES:
  EDGELINK_NODE_ID       Node identifier
  EDGELINK_BEARER_TOKEN  Upload credential for checker endpoints
  EDGELINK_PROBE_PORT    Local UDP port for NAT probing
"#)]
struct Args {
    /// Node identifier (auto-generated if not specified)
    #[arg(long, env = "EDGELINK_NODE_ID")]
    node_id: Option<String>,

    /// Bearer token presented on bandwidth uploads
    #[arg(long, env = "EDGELINK_BEARER_TOKEN")]
    bearer_token: Option<String>,

    /// Token carried in probe payloads
    #[arg(long, env = "EDGELINK_PROBE_TOKEN")]
    probe_token: Option<String>,

    /// Local UDP port shared by probe attempts
    #[arg(long, env = "EDGELINK_PROBE_PORT")]
    probe_port: Option<u16>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    node_id: Option<String>,
    bearer_token: Option<String>,
    probe_token: Option<String>,
    probe_port: Option<u16>,
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

fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

struct AgentSettings {
    node_id: String,
    bearer_token: String,
    probe_token: String,
    probe_port: u16,
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_settings(args: &Args) -> Result<AgentSettings> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let node_id = args.node_id.clone().or(file.node_id).unwrap_or_else(|| {
        let id = format!("node-{}", Uuid::new_v4());
        info!("Auto-generated node ID: {}", id);
        id
    });

    Ok(AgentSettings {
        node_id,
        bearer_token: args
            .bearer_token
            .clone()
            .or(file.bearer_token)
            .unwrap_or_default(),
        probe_token: args
            .probe_token
            .clone()
            .or(file.probe_token)
            .unwrap_or_default(),
        probe_port: args
            .probe_port
            .or(file.probe_port)
            .unwrap_or(DEFAULT_PROBE_PORT),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!("Edgelink agent starting...");

    let settings = build_settings(&args).context("Failed to build agent settings")?;

    info!("Node ID: {}", settings.node_id);
    info!("Probe port: {}", settings.probe_port);

    let probe = Arc::new(
        UdpProbe::bind(settings.probe_port, settings.node_id.clone())
            .await
            .context("Failed to bind probe socket")?,
    );
    let bandwidth = Arc::new(BandwidthService::new(Arc::new(StaticTokens::new(
        settings.bearer_token,
    ))));
    let dispatcher = Dispatcher::new(probe, bandwidth, settings.probe_token);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let message = line.trim();
                    if !message.is_empty() {
                        dispatcher.dispatch(message).await;
                    }
                }
                Ok(None) => {
                    info!("Control channel closed");
                    break;
                }
                Err(err) => {
                    warn!("Control channel read error: {}", err);
                    break;
                }
            }
        }
    }

    info!("Agent stopped");
    Ok(())
}
