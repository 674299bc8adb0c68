//! Echo handler for a single WebSocket connection.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use crate::config::BinaryPolicy;
use crate::connection::Connection;

const ECHO_PREFIX: &str = "Echo: ";

/// Reason sent with the close frame when a binary frame is rejected.
const BINARY_REJECT_REASON: &str = "only text frames are supported";

/// Failure that ends a handler without being a normal disconnect.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("receive failed: {0}")]
    Receive(#[source] WsError),
    #[error("send failed: {0}")]
    Send(#[source] WsError),
}

/// Build the reply for a received text message.
pub fn echo_reply(text: &str) -> String {
    let mut reply = String::with_capacity(ECHO_PREFIX.len() + text.len());
    reply.push_str(ECHO_PREFIX);
    reply.push_str(text);
    reply
}

/// Whether a transport error just means the peer went away.
///
/// A peer that drops the TCP connection without a closing handshake counts
/// as a disconnect, not a transport error.
fn is_disconnect(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Handle one WebSocket connection until it closes.
///
/// Returns `Ok(())` on any disconnect, whether clean or abrupt. Any other
/// receive or send failure is returned as a [`HandlerError`]. In both cases
/// `conn` ends in the closed state.
pub async fn handle_connection<S>(
    mut ws: WebSocketStream<S>,
    conn: &mut Connection,
    binary: BinaryPolicy,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = echo_loop(&mut ws, conn, binary).await;
    conn.close();
    result
}

async fn echo_loop<S>(
    ws: &mut WebSocketStream<S>,
    conn: &mut Connection,
    binary: BinaryPolicy,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // The stream ends once the closing handshake is complete.
    while let Some(frame) = ws.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(HandlerError::Receive(e)),
        };

        match message {
            Message::Text(text) => {
                conn.record_received();
                info!(text = text.as_str(), "Received");

                if !conn.can_send() {
                    debug!("Connection closing, not echoing");
                    continue;
                }

                // Utf8Bytes clones share the buffer.
                let reply = Utf8Bytes::from(echo_reply(text.as_str()));
                send(ws, Message::Text(reply.clone())).await?;
                conn.record_sent();
                info!(text = reply.as_str(), "Sent");
            }

            Message::Binary(data) => {
                conn.record_received();
                if !conn.can_send() {
                    continue;
                }

                match binary {
                    BinaryPolicy::Echo => {
                        let len = data.len();
                        send(ws, Message::Binary(data)).await?;
                        conn.record_sent();
                        info!(bytes = len, "Echoed binary frame");
                    }
                    BinaryPolicy::Drop => {
                        debug!(bytes = data.len(), "Dropped binary frame");
                    }
                    BinaryPolicy::Reject => {
                        warn!(bytes = data.len(), "Binary frame rejected, closing");
                        let frame = CloseFrame {
                            code: CloseCode::Unsupported,
                            reason: BINARY_REJECT_REASON.into(),
                        };
                        send(ws, Message::Close(Some(frame))).await?;
                        conn.begin_close();
                    }
                }
            }

            Message::Close(frame) => {
                match frame {
                    Some(frame) => debug!(
                        code = u16::from(frame.code),
                        reason = frame.reason.as_str(),
                        "Close frame received"
                    ),
                    None => debug!("Close frame received"),
                }
                // The reply is queued by the library and flushed on the next poll.
                conn.begin_close();
            }

            Message::Ping(_) | Message::Pong(_) => {
                trace!("Control frame");
            }

            Message::Frame(_) => {}
        }
    }

    Ok(())
}

async fn send<S>(ws: &mut WebSocketStream<S>, message: Message) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match ws.send(message).await {
        Ok(()) => Ok(()),
        // The peer vanished mid-send; report it as a disconnect.
        Err(e) if is_disconnect(&e) => Ok(()),
        Err(e) => Err(HandlerError::Send(e)),
    }
}
