//! clawrelay CLI - connect an agent to its relay
//!
//! Keeps a tunnel open to the relay and replays every forwarded webhook
//! against a local HTTP service, reconnecting automatically.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawrelay_agent::{AgentConfig, ReconnectConfig, TunnelClient};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// clawrelay - tunnel webhooks from the relay to a local agent
#[derive(Parser, Debug)]
#[command(name = "clawrelay")]
#[command(about = "clawrelay - tunnel webhooks from the relay to a local agent")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a tunnel to the relay and forward requests to a local service
    #[command(long_about = r#"
Open a tunnel to the relay and forward every webhook it receives for this
deployment to a local HTTP service. Reconnects automatically if the
connection drops.

EXAMPLES:
  clawrelay connect --relay https://relay.example.com \
    --token $CLAWRELAY_TOKEN \
    --forward http://127.0.0.1:3000

ENVIRONMENT VARIABLES:
  CLAWRELAY_RELAY    Relay base URL (http, https, ws or wss)
  CLAWRELAY_TOKEN    Relay token of the deployment
  CLAWRELAY_FORWARD  Local service URL
    "#)]
    Connect {
        /// Relay base URL (e.g., https://relay.example.com)
        #[arg(long, env = "CLAWRELAY_RELAY")]
        relay: String,

        /// Relay token printed by `clawrelay-relay deployment create`
        #[arg(long, env = "CLAWRELAY_TOKEN", hide_env_values = true)]
        token: String,

        /// Local service that receives the forwarded requests
        #[arg(long, env = "CLAWRELAY_FORWARD")]
        forward: String,

        /// Maximum consecutive reconnection attempts (0 = infinite)
        #[arg(long, default_value = "0")]
        max_reconnect_attempts: usize,

        /// Initial reconnection delay in seconds
        #[arg(long, default_value = "1")]
        reconnect_delay: u64,

        /// Maximum reconnection delay in seconds
        #[arg(long, default_value = "60")]
        max_reconnect_delay: u64,

        /// Seconds between heartbeats
        #[arg(long, default_value = "30")]
        heartbeat_secs: u64,
    },
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Connect {
            relay,
            token,
            forward,
            max_reconnect_attempts,
            reconnect_delay,
            max_reconnect_delay,
            heartbeat_secs,
        } => {
            let mut config =
                AgentConfig::new(&relay, &token, &forward).context("Invalid agent configuration")?;
            config.heartbeat_interval = Duration::from_secs(heartbeat_secs.max(1));
            config.reconnect = ReconnectConfig {
                initial_backoff: Duration::from_secs(reconnect_delay),
                max_backoff: Duration::from_secs(max_reconnect_delay),
                max_attempts: (max_reconnect_attempts > 0).then_some(max_reconnect_attempts),
                ..Default::default()
            };

            info!("Relay: {}", relay);
            info!("Forwarding to: {}", forward);

            let client = TunnelClient::new(config).context("Failed to create tunnel client")?;
            let shutdown = CancellationToken::new();

            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down...");
                    signal.cancel();
                }
            });

            if let Err(e) = client.run(shutdown).await {
                error!("Tunnel stopped: {}", e);
                return Err(e.into());
            }

            info!("clawrelay stopped");
            Ok(())
        }
    }
}
