//! Connection state machine for an accepted WebSocket session.
//!
//! Each connection tracks its current state and the peer it belongs to.
//! A connection is owned by exactly one handler task.

use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Receiving and echoing messages.
    Open,
    /// We sent a close frame and are waiting for the peer's reply.
    Closing,
    /// Terminal. Nothing is sent or received.
    Closed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    /// Remote address, for logging.
    pub peer: SocketAddr,
    /// Current connection state.
    pub state: ConnState,
    /// Messages received from the peer.
    pub received: u64,
    /// Messages sent back to the peer.
    pub sent: u64,
}

impl Connection {
    /// Create a new connection in the open state.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: ConnState::Open,
            received: 0,
            sent: 0,
        }
    }

    /// Whether data frames may still be sent.
    pub fn can_send(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Transition to closing after initiating the close handshake.
    pub fn begin_close(&mut self) {
        if self.state == ConnState::Open {
            self.state = ConnState::Closing;
        }
    }

    /// Mark connection as closed.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }

    pub fn record_received(&mut self) {
        self.received += 1;
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }
}
