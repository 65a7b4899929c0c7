//! Pong Game Server
//!
//! Serves `/ws/game/<session-key>/` WebSocket connections.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, fixed-rate ticks at 60 Hz, auto start
//! pong-server
//!
//! # Tick once per move, wait for both players to send ready
//! pong-server --tick-mode on_input --start-policy ready
//!
//! # Same settings through the environment
//! PONG_TICK_MODE=on_input PONG_START_POLICY=ready pong-server
//!
//! # Debug logging
//! RUST_LOG=pong_server=debug pong-server
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use pong_server::network::session::{StartPolicy, TickMode};
use pong_server::{GameServer, ServerConfig, VERSION};

/// Authoritative two-player pong server
#[derive(Parser, Debug)]
#[command(name = "pong-server", version, about)]
struct Args {
    /// Address to bind to
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Fixed-rate tick loop frequency (Hz)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// When the simulation advances: fixed_rate or on_input
    #[arg(long)]
    tick_mode: Option<TickMode>,

    /// When a full session starts: auto or ready
    #[arg(long)]
    start_policy: Option<StartPolicy>,

    /// Score that ends a match
    #[arg(long)]
    points_to_win: Option<u32>,

    /// Fixed serve seed for reproducible matches
    #[arg(long)]
    rng_seed: Option<u64>,
}

impl Args {
    /// Flags override the environment, which overrides defaults.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(rate) = self.tick_rate {
            config.session.tick_rate = rate;
        }
        if let Some(mode) = self.tick_mode {
            config.session.tick_mode = mode;
        }
        if let Some(policy) = self.start_policy {
            config.session.start_policy = policy;
        }
        if let Some(points) = self.points_to_win {
            config.session.board.points_to_win = points;
        }
        if let Some(seed) = self.rng_seed {
            config.session.rng_seed = Some(seed);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::from_env().context("reading PONG_* environment")?;
    let config = args.apply(config);
    config.validate().context("invalid server configuration")?;

    info!("Pong Server v{}", VERSION);
    info!(
        "Tick mode: {:?} @ {} Hz, start policy: {:?}, first to {}",
        config.session.tick_mode,
        config.session.tick_rate,
        config.session.start_policy,
        config.session.board.points_to_win,
    );

    let server = Arc::new(GameServer::new(config));

    let server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e).context("server stopped"),
                Err(e) => error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown();
            // Give connection tasks a moment to send the shutdown notice
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    Ok(())
}
