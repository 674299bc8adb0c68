//! echo-socket: A WebSocket echo server for testing
//!
//! Every text message a client sends comes back as `Echo: <message>`.
//! It exists as a counterpart for exercising WebSocket client code.
//!
//! Features:
//! - One independent task per connection
//! - Configurable handling of binary frames
//! - Connection and message size limits
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod echo;
mod server;

use config::Config;
use server::{Server, ServerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        max_message_size = config.max_message_size,
        binary = ?config.binary,
        "Starting echo-socket server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    if let Err(e) = runtime.block_on(run(config)) {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }
    Ok(())
}

/// Bind, then serve until interrupted.
async fn run(config: Config) -> Result<(), ServerError> {
    let server = Server::bind(config).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_interrupt(shutdown.clone()));

    server.run(shutdown).await
}

async fn wait_for_interrupt(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Interrupt received, stopping");
            shutdown.cancel();
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for interrupt");
        }
    }
}
