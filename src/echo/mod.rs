//! Echo service over WebSocket.
//!
//! A test counterpart for WebSocket client code:
//! - Client sends a text frame: `<text>`
//! - Server replies with one text frame: `Echo: <text>`
//!
//! ## Frame Handling
//!
//! ```text
//! Request:  "hello"
//! Response: "Echo: hello"
//!
//! Request:  ""
//! Response: "Echo: "
//! ```
//!
//! Ping frames are answered with pongs by the WebSocket layer. A close frame
//! from the peer completes the closing handshake and ends the handler.
//! Binary frames follow the configured [`BinaryPolicy`](crate::config::BinaryPolicy).

pub mod handler;

pub use handler::handle_connection;
