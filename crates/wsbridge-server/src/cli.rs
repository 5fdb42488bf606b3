//! CLI module for the bridge.
//!
//! Used by the `wsbridge` binary; kept here so the argument set and startup
//! sequence can be embedded elsewhere.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wsbridge_core::defaults;

use crate::config::{
    BridgeConfig, CliOverrides, LoggingConfig, apply_overrides, load_config, validate_config,
};
use crate::{CancellationToken, run_with_shutdown};

/// Bridge CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wsbridge",
    version,
    about = "Relay TCP clients to a WebSocket server, one WebSocket per connection"
)]
pub struct BridgeArgs {
    /// Optional config file (toml); flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the bridge with the given arguments.
///
/// Returns once a shutdown signal has been handled and every session closed.
pub async fn run(args: BridgeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);
    info!(
        version = wsbridge_core::VERSION,
        tcp_port = config.tcp_port,
        ws_url = %config.ws_url,
        "starting {}",
        wsbridge_core::PROJECT_NAME
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        let signal = termination_signal().await;
        info!(signal, "shutdown signal received");
        shutdown_signal.cancel();
    });

    run_with_shutdown(config, shutdown).await?;
    Ok(())
}

/// Resolve with the name of the first termination signal delivered.
///
/// A signal that cannot be registered is logged and never fires.
async fn termination_signal() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}

/// Initialize the tracing subscriber.
///
/// `level` is a base level or a full `EnvFilter` directive; `format` is one of
/// `pretty` (default), `compact` or `json`. Output always goes to stderr.
fn init_tracing(config: &LoggingConfig) {
    let level = config.level.as_deref().unwrap_or(defaults::DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let format = config.format.as_deref().unwrap_or(defaults::DEFAULT_LOG_FORMAT);

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "json" => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        "compact" => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init(),
        _ => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
}
