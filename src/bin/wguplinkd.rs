//! WireGuard Uplink Daemon (wguplinkd)
//!
//! Keeps a WireGuard tunnel to the collection server up and periodically
//! ships captured handshake files over it.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (requires root for wg-quick)
//! sudo wguplinkd --config /etc/wguplink/config.toml
//!
//! # Start with verbose logging
//! sudo wguplinkd --verbose
//! ```

use clap::Parser;
use libwguplink::{Uplink, UplinkConfig, UplinkResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// WireGuard Uplink Daemon
#[derive(Parser, Debug)]
#[command(name = "wguplinkd")]
#[command(author = "wguplink contributors")]
#[command(version)]
#[command(about = "Maintains a WireGuard uplink and ships captured handshakes", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/wguplink/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between connectivity ticks
    #[arg(long, default_value_t = 30)]
    tick_interval: u64,
}

#[tokio::main]
async fn main() -> UplinkResult<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting WireGuard Uplink Daemon (wguplinkd)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::getuid() };
        if uid != 0 {
            warn!("Not running as root - wg-quick will likely fail");
            warn!("Consider running with sudo");
        }
    }

    // Missing required fields are fatal; the service never becomes ready
    // on an invalid configuration.
    let config = match UplinkConfig::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from {:?}: {}", args.config, e);
            return Err(e);
        }
    };

    let uplink = Arc::new(Uplink::new(config)?);
    uplink.start().await;

    let mut tick = tokio::time::interval(Duration::from_secs(args.tick_interval));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                uplink.tick(unix_now()).await;
                if let Some(status) = uplink.status() {
                    info!("Status: {}", status);
                }
            }
            _ = shutdown_signal() => {
                break;
            }
        }
    }

    info!("Shutting down WireGuard Uplink Daemon...");
    uplink.stop().await;
    info!("WireGuard Uplink Daemon stopped");
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Initialize logging based on command-line arguments
fn init_logging(args: &Args) {
    let log_level = if args.verbose { "debug" } else { &args.log_level };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "wguplinkd={},libwguplink={}",
            log_level, log_level
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                return std::future::pending::<()>().await;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to register SIGINT handler: {}", e);
                return std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}
