//! Interface State Watcher Daemon
//!
//! Main entry point for the netstated daemon.
//! Watches kernel link operational state and logs changes for the configured
//! interfaces.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle and link changes
//! - SI-4: System Monitoring - Real-time event processing

use clap::Parser;
use sonic_netstated::config_file::DEFAULT_CONFIG_PATH;
use sonic_netstated::{Filter, NetstatedConfig, Result, Subscription, WatchError, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Watch kernel link operational state changes
#[derive(Debug, Parser)]
#[command(name = "netstated", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Additional interface to report every change for (repeatable)
    #[arg(short, long = "interface", value_name = "NAME")]
    interfaces: Vec<String>,

    /// Log level, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = NetstatedConfig::load_or_default(&args.config)?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging.level)?;
    config.validate()?;

    info!("netstated: Starting interface state watcher");

    match run_daemon(config, args.interfaces).await {
        Ok(()) => {
            info!("netstated: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "netstated: Daemon exiting with error");
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}

/// Initialize structured logging; RUST_LOG takes precedence
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| WatchError::Configuration(format!("Invalid log level {}: {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| WatchError::Configuration(format!("Failed to set logger: {}", e)))
}

async fn run_daemon(config: NetstatedConfig, extra_interfaces: Vec<String>) -> Result<()> {
    let watcher = Arc::new(Watcher::with_config(config.watcher.clone()));

    for sub in &config.subscriptions {
        spawn_reporter(watcher.subscribe(sub.interface.clone(), sub.filter()?));
    }
    for interface in extra_interfaces {
        spawn_reporter(watcher.subscribe(interface, Filter::Any));
    }

    info!(
        subscriptions = watcher.subscription_count(),
        "netstated: Registered subscriptions"
    );

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone());

    watcher.watch(cancel).await
}

/// Log every change delivered to a subscription
fn spawn_reporter(mut sub: Subscription) {
    tokio::spawn(async move {
        while let Some(change) = sub.recv().await {
            info!(interface = %sub.interface(), %change, "netstated: Link state changed");
        }
    });
}

/// Cancel the watch on SIGINT or SIGTERM
fn setup_signal_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "netstated: Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        info!("netstated: Received shutdown signal");
        cancel.cancel();
    });
}
