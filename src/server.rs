//! WebSocket listener for the echo service.
//!
//! Accepts TCP connections, performs the WebSocket handshake and hands each
//! connection to its own echo handler task. Handler tasks share no state.

use crate::config::{BinaryPolicy, Config};
use crate::connection::Connection;
use crate::echo::handle_connection;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Server startup and accept-loop errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    #[error("connection limiter closed")]
    LimiterClosed(#[from] AcquireError),
}

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Fails if the address is unavailable, e.g. another instance already
    /// holds the port.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Ok(Server {
            config,
            listener,
            local_addr,
            connection_limit,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Connections still open at that point are not drained.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!(url = %format!("ws://{}", self.local_addr), "WebSocket echo server started");
        info!("Waiting for connections");

        let socket_config = websocket_config(self.config.max_message_size);
        let binary = self.config.binary;
        let handshake_timeout = self.config.handshake_timeout;

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.connection_limit.clone().acquire_owned() => permit?,
            };

            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(
                        serve_connection(
                            stream,
                            peer,
                            socket_config,
                            handshake_timeout,
                            binary,
                            permit,
                        )
                        .instrument(info_span!("conn", %peer)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config
}

/// Upgrade one TCP stream and echo on it until it closes.
///
/// Handshake and handler failures stay inside this task. A client that
/// does not finish the handshake within `handshake_timeout` is dropped so
/// its connection slot is freed.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    socket_config: WebSocketConfig,
    handshake_timeout: Duration,
    binary: BinaryPolicy,
    _permit: OwnedSemaphorePermit,
) {
    let handshake = accept_async_with_config(stream, Some(socket_config));
    let ws = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!(error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            warn!(timeout = ?handshake_timeout, "WebSocket handshake timed out");
            return;
        }
    };

    let mut conn = Connection::new(peer);
    info!(peer = %conn.peer, "Client connected");

    match handle_connection(ws, &mut conn, binary).await {
        Ok(()) => {
            info!(
                peer = %conn.peer,
                received = conn.received,
                sent = conn.sent,
                "Client disconnected"
            );
        }
        Err(e) => {
            error!(
                peer = %conn.peer,
                error = %e,
                received = conn.received,
                sent = conn.sent,
                "Connection error"
            );
        }
    }
}
