//! HEMS device tester service: entry point.
//!
//! Starts the observer stream and the HTTP API on top of one shared peer
//! registry, and drives the registry from a protocol engine.  The bundled
//! engine replays recorded events (`--events`), which keeps the service
//! usable for UI work and scripted checks without a live device.
//!
//! # Usage
//!
//! ```text
//! hems-tester [OPTIONS]
//!
//! Options:
//!   --config <PATH>        TOML configuration [default: hems-tester.toml]
//!   --bind <IP>            Listener address for both servers
//!   --http-port <PORT>     HTTP API port
//!   --ws-port <PORT>       Observer stream port
//!   --remote-ski <SKI>     Register this remote device at startup
//!   --events <PATH>        Replay engine events from this JSONL file
//!   --log-capacity <N>     Retained log lines
//!   --write-config         Write the effective configuration and exit
//! ```
//!
//! Every option can also be set through a `HEMS_*` environment variable;
//! command-line values win over the environment, which wins over the file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hems_core::{PeerId, Severity};
use hems_service::application::{Broadcaster, CommandService, EchoLevels, EventRouter, PeerRegistry};
use hems_service::infrastructure::storage::config::{load_config, save_config, AppConfig};
use hems_service::infrastructure::{http_api, ws_server, ApiState, ReplayEngine};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HEMS device tester.
///
/// Tracks remote devices and streams every change to attached observers.
#[derive(Debug, Parser)]
#[command(
    name = "hems-tester",
    about = "Peer registry and observer fan-out for EEBUS device testing",
    version
)]
struct Cli {
    /// Configuration file; a missing file means built-in defaults.
    #[arg(long, default_value = "hems-tester.toml", env = "HEMS_CONFIG")]
    config: PathBuf,

    /// IP address both listeners bind to.
    #[arg(long, env = "HEMS_BIND")]
    bind: Option<String>,

    /// TCP port of the HTTP API.
    #[arg(long, env = "HEMS_HTTP_PORT")]
    http_port: Option<u16>,

    /// TCP port of the WebSocket observer stream.
    #[arg(long, env = "HEMS_WS_PORT")]
    ws_port: Option<u16>,

    /// SKI of a remote device to register before any event arrives.
    #[arg(long, env = "HEMS_REMOTE_SKI")]
    remote_ski: Option<String>,

    /// Newline-delimited JSON engine events to replay at startup.
    #[arg(long, env = "HEMS_EVENTS")]
    events: Option<PathBuf>,

    /// Number of log lines kept for late observers.
    #[arg(long, env = "HEMS_LOG_CAPACITY")]
    log_capacity: Option<usize>,

    /// Write the effective configuration to `--config` and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;

        if let Some(bind) = self.bind {
            cfg.web.bind_address = bind;
        }
        if let Some(port) = self.http_port {
            cfg.web.http_port = port;
        }
        if let Some(port) = self.ws_port {
            cfg.web.ws_port = port;
        }
        if let Some(ski) = self.remote_ski {
            cfg.service.remote_ski = Some(ski);
        }
        if let Some(path) = self.events {
            cfg.service.events_file = Some(path);
        }
        if let Some(n) = self.log_capacity {
            cfg.service.log_capacity = n;
        }
        Ok(cfg)
    }
}

fn listen_addr(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address '{bind}:{port}'"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let write_config = cli.write_config;
    let config = cli.into_app_config()?;

    if write_config {
        save_config(&config_path, &config)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let http_addr = listen_addr(&config.web.bind_address, config.web.http_port)?;
    let ws_addr = listen_addr(&config.web.bind_address, config.web.ws_port)?;

    // ── Shared state ──────────────────────────────────────────────────────────
    let registry = Arc::new(PeerRegistry::with_usecases(config.usecases.clone()));
    let broadcaster = Arc::new(
        Broadcaster::new(Arc::clone(&registry), config.service.log_capacity)
            .with_queue_depth(config.service.queue_depth)
            .with_echo(EchoLevels {
                trace: config.logging.echo_trace,
                debug: config.logging.echo_debug,
            }),
    );
    let router = EventRouter::new(Arc::clone(&broadcaster));
    let engine = Arc::new(ReplayEngine::new(router.clone()));
    let commands = CommandService::new(engine.clone(), Arc::clone(&registry));

    if let Some(ski) = &config.service.remote_ski {
        registry.get_or_create(&PeerId::new(ski.clone()));
        router.engine_log(Severity::Info, &format!("registered remote SKI {ski}"));
    }

    info!(
        "HEMS device tester starting: http={http_addr}, ws={ws_addr}, {} use cases",
        config.usecases.len()
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Engine ────────────────────────────────────────────────────────────────
    if let Some(path) = config.service.events_file.clone() {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = engine.replay_file(&path).await {
                error!("replay failed: {e}");
            }
        });
    }

    // ── Servers ───────────────────────────────────────────────────────────────
    let state = ApiState::new(Arc::clone(&broadcaster), commands);
    tokio::try_join!(
        ws_server::run_server(ws_addr, Arc::clone(&broadcaster), Arc::clone(&running)),
        http_api::run_server(http_addr, state, Arc::clone(&running)),
    )?;

    info!("HEMS device tester stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
