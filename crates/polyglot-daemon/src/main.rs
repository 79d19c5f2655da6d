//! Polyglot daemon - mediator between a home-automation controller and
//! node-server child processes.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background service mediating between a home-automation controller and
/// node-server child processes.
#[derive(Parser, Debug)]
#[command(name = "polyglot-daemon")]
#[command(about = "Mediator between a home-automation controller and node-server child processes")]
#[command(version)]
struct Args {
    /// Path to the config directory (default: $POLYGLOT_HOME/config)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose (DEBUG) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    polyglot_core::logging::init(args.verbose);

    info!("polyglot-daemon starting");

    let config_dir = match args.config {
        Some(p) => p,
        None => polyglot_core::home::get_config_dir().context("failed to resolve config directory")?,
    };
    info!("config directory: {}", config_dir.display());

    let tree = polyglot_core::config::load(&config_dir).context("failed to read configuration.json")?;
    let controller = config::controller_config(&tree).context("failed to resolve controller credentials")?;
    let (bind_address, port) = config::http_bind(&tree);

    let manager = polyglot_manager::Manager::new(controller, config_dir)
        .context("failed to initialize the node-server manager")?;
    manager.fetch_isy_version().await;

    let cancel_token = CancellationToken::new();
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for Ctrl+C");
            info!("received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    let router = manager.router();
    let serve_cancel = cancel_token.clone();
    let http_handle = tokio::spawn(async move {
        tokio::select! {
            result = polyglot_http::serve(router, &bind_address, port) => {
                if let Err(e) = result {
                    tracing::error!("HTTP listener exited: {e}");
                }
            }
            _ = serve_cancel.cancelled() => {
                info!("HTTP listener shutting down");
            }
        }
    });

    manager.load().await;
    info!("node servers loaded, serving");

    cancel_token.cancelled().await;

    manager.unload().await;
    http_handle.abort();

    info!("polyglot-daemon shutdown complete");
    Ok(())
}
