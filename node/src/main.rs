// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CMA Node
//!
//! Entry point for the `cma-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the graph database and runs the single-writer
//! receive loop on a current-thread runtime.
//!
//! - `run`     - start the CMA
//! - `init`    - create the data directory and a default `cma.json`
//! - `version` - print build version information

mod cli;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use cma_protocol::config::CmaConfig;
use cma_protocol::network::{register_default_handlers, MessageRouter, PacketListener};
use cma_protocol::registry::{ChannelObserver, NodeEvent};
use cma_protocol::storage::GraphStore;
use cma_protocol::transport::{Transport, UdpTransport};
use cma_protocol::CmaContext;

use cli::{CmaNodeCli, Commands};
use logging::LogFormat;
use metrics::CmaMetrics;

/// Broadcast capacity for drone events. A burst larger than this makes the
/// event logger skip, never the dispatch loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const CONFIG_FILE: &str = "cma.json";
const GRAPH_DIR: &str = "graph";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = CmaNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_cma(args).await,
        Commands::Init(args) => init_data_dir(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the CMA: metrics endpoint, event logger and the receive loop.
/// Returns an error, and so a non-zero exit status, on any fatal dispatch
/// failure.
async fn run_cma(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.log_format.into());

    let config = load_config(args.config.as_deref(), &args.data_dir)?;
    info!(
        listen = %args.listen,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        encryption_required = config.encryption_required,
        rings = config.rings.len(),
        "starting cma-node"
    );

    // --- Graph database ---
    let graph_path = args.data_dir.join(GRAPH_DIR);
    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;
    let store = GraphStore::open(&graph_path)
        .with_context(|| format!("failed to open graph at {}", graph_path.display()))?;

    // --- Transport ---
    let transport = UdpTransport::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind UDP socket on {}", args.listen))?;
    let socket = transport.socket();
    let local_addr = transport.local_addr()?;

    // --- Registry ---
    let mut ctx = CmaContext::new(config.clone(), store, transport.identities())
        .context("failed to load the registry")?;
    ctx.registry
        .audit_rings(&ctx.store)
        .context("persisted rings are inconsistent")?;
    info!(
        drones = ctx.registry.drone_count(),
        up = ctx.registry.up_count(),
        "registry loaded"
    );

    // --- Metrics ---
    let metrics = Arc::new(CmaMetrics::new().context("failed to create metrics")?);
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
    let http_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    let metrics_app = metrics::router(Arc::clone(&metrics));
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, metrics_app).await {
            error!(error = %e, "metrics server error");
        }
    });
    info!(addr = %metrics_addr, "metrics server listening");

    // --- Events ---
    let (observer, events) = ChannelObserver::new(EVENT_CHANNEL_CAPACITY);
    ctx.registry.events_mut().register(observer);
    let event_log = tokio::spawn(log_events(events, Arc::clone(&metrics)));

    // --- Receive loop ---
    let mut router = MessageRouter::new();
    register_default_handlers(&mut router);
    let mut listener = PacketListener::new(transport, router, config.encryption_required);
    metrics.observe_state(&ctx, listener.router().stats(), listener.queue_depth());
    info!(listen = %local_addr, "CMA ready");

    let result = serve(&mut listener, &mut ctx, &socket, &metrics).await;

    metrics_server.abort();
    event_log.abort();
    match &result {
        Ok(()) => info!("cma-node stopped"),
        Err(e) => error!(error = %e, "cma-node terminating"),
    }
    result
}

/// Waits for readiness and hands it to the listener until shutdown or a
/// fatal handler failure.
async fn serve(
    listener: &mut PacketListener<UdpTransport>,
    ctx: &mut CmaContext,
    socket: &UdpSocket,
    metrics: &CmaMetrics,
) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            ready = socket.readable() => {
                ready.context("socket readiness failed")?;
                match listener.handle_readiness(ctx) {
                    Ok(report) => metrics.observe_readiness(&report),
                    Err(err) => {
                        metrics.handler_failures_total.inc();
                        error!(severity = "critical", error = %err.chain(), "stopping after handler failure");
                        return Err(err).context("fatal dispatch error");
                    }
                }
                metrics.observe_state(ctx, listener.router().stats(), listener.queue_depth());
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

/// Logs every drone event and counts it.
async fn log_events(mut events: broadcast::Receiver<NodeEvent>, metrics: Arc<CmaMetrics>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                metrics.observe_event(&event);
                info!(
                    kind = %event.kind,
                    designation = %event.designation,
                    status = %event.status,
                    reason = %event.reason,
                    detail = ?event.detail,
                    "drone event"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Reads the configuration from `explicit`, else from `cma.json` in the
/// data directory, else falls back to defaults.
fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<CmaConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let candidate = data_dir.join(CONFIG_FILE);
            if !candidate.exists() {
                return Ok(CmaConfig::default());
            }
            candidate
        }
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    CmaConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Creates the data directory and writes the default configuration.
fn init_data_dir(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, LogFormat::Pretty);

    let config_path = write_default_config(&args.data_dir, args.force)?;
    info!(path = %config_path.display(), "configuration written");

    println!("Data directory initialized.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Configuration  : {}", config_path.display());
    Ok(())
}

fn write_default_config(data_dir: &Path, force: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let path = data_dir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let json = serde_json::to_string_pretty(&CmaConfig::default())?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn print_version() {
    println!("cma-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc    {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, dir.path()).unwrap();
        assert_eq!(config, CmaConfig::default());
    }

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_default_config(dir.path(), false).unwrap();
        assert!(path.ends_with(CONFIG_FILE));
        assert_eq!(load_config(None, dir.path()).unwrap(), CmaConfig::default());
        assert!(write_default_config(dir.path(), false).is_err());
        assert!(write_default_config(dir.path(), true).is_ok());
    }

    #[test]
    fn explicit_partial_config_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"encryption_required": true}"#).unwrap();
        let config = load_config(Some(&path), dir.path()).unwrap();
        assert!(config.encryption_required);
        assert_eq!(config.rings, CmaConfig::default().rings);
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }
}
