//! # Fleet Tracker
//!
//! GPS telemetry agent for fleet vehicles.
//!
//! Samples fixes from the on-board receiver, reports significant movement and
//! periodic heartbeats over the cellular uplink, and answers remote commands.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fleet_tracker::agent::dispatcher::DispatchSettings;
use fleet_tracker::agent::{
    Agent, AgentState, CommandDispatcher, IdentityStore, ReportEngine, ShellRunner, SystemClock,
};
use fleet_tracker::config::{Config, LoggingConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use fleet_tracker::gps::cache::PositionCache;
use fleet_tracker::gps::{reader, GpsFeed};
use fleet_tracker::transport::CloudTransport;

/// Main entry point for Fleet Tracker
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (`FLEET_TRACKER_CONFIG`, default `/etc/fleet-tracker/config.toml`)
///    - Set up logging with tracing subscriber
///    - Load the asset identity (fatal if missing)
///
/// 2. **Run**
///    - GPS reader publishes fixes at the receiver's rate
///    - Decision loop polls the latest fix and reports when warranted
///    - Inbound handler dispatches remote commands
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C or SIGTERM stops both loops and the reader
///
/// # Errors
///
/// Returns error if the configuration or identity files cannot be loaded.
/// Nothing after startup is fatal.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("Fleet Tracker v{} starting...", env!("CARGO_PKG_VERSION"));

    let identity_store = IdentityStore::new(&config.identity);
    let identity = identity_store.load().context("Cannot establish asset identity")?;
    let state = AgentState::new(identity).shared();

    let feed = Arc::new(GpsFeed::new(
        config.gps.position_cache_file.as_ref().map(PositionCache::new),
    ));
    let transport = Arc::new(CloudTransport::new(config.transport.clone()));

    let engine = Arc::new(ReportEngine::new(
        config.report.clone(),
        transport.clone(),
        feed.clone(),
        Arc::new(SystemClock),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        state.clone(),
        engine.clone(),
        feed.clone(),
        transport.clone(),
        identity_store,
        Arc::new(ShellRunner::new(config.commands.shell.clone())),
        DispatchSettings::from_config(&config.gps, &config.commands),
    ));

    let agent = Agent::new(
        state,
        engine,
        dispatcher,
        transport,
        feed.clone(),
        Duration::from_secs(config.gps.fix_max_age_secs),
        Duration::from_secs(config.report.poll_interval_secs),
    );
    let handle = agent.start();

    let gps_reader = tokio::spawn(reader::run_serial(
        config.gps.clone(),
        feed,
        handle.shutdown_signal(),
    ));

    wait_for_shutdown().await;
    info!("Shutting down...");

    handle.stop().await;
    let _ = gps_reader.await;
    Ok(())
}

/// Initialize tracing; `RUST_LOG` overrides the configured level
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM from the service supervisor
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
