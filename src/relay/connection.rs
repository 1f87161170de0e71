//! Per-connection relay task.
//!
//! Each relayed connection runs one task that owns both endpoint streams
//! (the intercepted client and the outbound server) and a command channel.
//! A `tokio::select!` loop multiplexes commands and, once the readiness
//! gate is open, both stream halves.
//!
//! # Gate
//!
//! Until the observer's `ready` signal arrives, the loop never polls
//! either stream: frames stay buffered in the transport and zero `data`
//! events are emitted. The gate transition is idempotent.
//!
//! # Relay semantics
//!
//! Inbound frames are mirrored to the notification channel and NOT
//! forwarded to the opposite endpoint. Forwarding happens only through an
//! explicit send command dispatched by the Control API, making the relay
//! operator-mediated: log-and-forward or log-and-drop is always the
//! operator's call.
//!
//! # Close
//!
//! Either endpoint closing or erroring, or an explicit close/shutdown
//! command, ends the task: both endpoints receive a close frame carrying
//! the initiator's code and reason (1000 and an empty reason when none was
//! supplied), one `close-connection` event names the initiating side, and
//! the record is removed from the registry. A close on an already-closed
//! connection is a no-op.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::event::{EventSender, ProxyEvent};
use crate::protocol::frame::{Frame, Side};
use crate::relay::registry::{ConnectionRecord, ConnectionRegistry, EndpointState};

// ============================================================================
// Constants
// ============================================================================

/// Close code used when no explicit code accompanies a close.
pub(crate) const DEFAULT_CLOSE_CODE: u16 = 1000;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Commands accepted by the relay task.
pub(crate) enum ConnectionCommand {
    /// Open the readiness gate. Idempotent.
    Ready,
    /// Write a frame on the named endpoint and report the result.
    Send {
        /// Endpoint to write on.
        side: Side,
        /// Frame to write.
        frame: Frame,
        /// Result channel back to the dispatcher.
        reply_tx: oneshot::Sender<Result<()>>,
    },
    /// Close the connection, naming the initiating side.
    Close {
        /// Side reported as the close initiator.
        side: Side,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Session stop: close both endpoints and terminate.
    Shutdown,
}

// ============================================================================
// CloseSignal
// ============================================================================

/// Why the relay loop ended.
struct CloseSignal {
    /// Side that initiated the close.
    sender: Side,
    /// Close code to propagate.
    code: u16,
    /// Close reason to propagate.
    reason: String,
}

impl CloseSignal {
    fn normal(sender: Side) -> Self {
        Self {
            sender,
            code: DEFAULT_CLOSE_CODE,
            reason: String::new(),
        }
    }
}

// ============================================================================
// Relay Task
// ============================================================================

/// Runs the relay loop for one paired connection until close.
///
/// Spawned by the engine once the outbound endpoint reports open. The
/// gate starts shut; only commands are processed until `Ready` arrives.
pub(crate) async fn run_relay<C, S>(
    id: ConnectionId,
    client: C,
    server: S,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    record: Arc<ConnectionRecord>,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
) where
    C: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static,
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut server_tx, mut server_rx) = server.split();
    let mut gate_open = false;

    debug!(id = %id, "relay task started (gated)");

    let signal = loop {
        tokio::select! {
            command = command_rx.recv() => {
                let signal = on_command(
                    command,
                    &mut gate_open,
                    &mut client_tx,
                    &mut server_tx,
                    &record,
                    id,
                )
                .await;

                if let Some(signal) = signal {
                    break signal;
                }
            }

            item = client_rx.next(), if gate_open => {
                if let Some(signal) = on_stream_item(Side::Client, item, id, &record, &events) {
                    break signal;
                }
            }

            item = server_rx.next(), if gate_open => {
                if let Some(signal) = on_stream_item(Side::Server, item, id, &record, &events) {
                    break signal;
                }
            }
        }
    };

    // Propagate the initiator's code and reason to both endpoints. The
    // initiating socket receives its closing-handshake reply, the other
    // side an initiated close.
    let close_message = Message::Close(Some(CloseFrame {
        code: CloseCode::from(signal.code),
        reason: signal.reason.clone().into(),
    }));

    let _ = client_tx.send(close_message.clone()).await;
    let _ = server_tx.send(close_message).await;

    record.update_status(|status| {
        status.client_state = Some(EndpointState::Closed);
        status.server_state = Some(EndpointState::Closed);
    });

    let _ = events.send(ProxyEvent::CloseConnection {
        sender: signal.sender,
        id,
    });

    registry.remove_entry(id, &record);
    debug!(id = %id, sender = %signal.sender, code = signal.code, "relay task terminated");
}

// ============================================================================
// Command Handling
// ============================================================================

/// Handles one command; returns a close signal when the loop should end.
async fn on_command<CS, SS>(
    command: Option<ConnectionCommand>,
    gate_open: &mut bool,
    client_tx: &mut CS,
    server_tx: &mut SS,
    record: &ConnectionRecord,
    id: ConnectionId,
) -> Option<CloseSignal>
where
    CS: Sink<Message, Error = WsError> + Unpin,
    SS: Sink<Message, Error = WsError> + Unpin,
{
    match command {
        Some(ConnectionCommand::Ready) => {
            if !*gate_open {
                *gate_open = true;
                record.update_status(|status| status.gate_open = true);
                debug!(id = %id, "gate opened");
            }
            None
        }

        Some(ConnectionCommand::Send {
            side,
            frame,
            reply_tx,
        }) => {
            // A terminal endpoint means the closing handshake already
            // started; finish tearing the pair down instead of writing.
            let status = record.status();
            if status.client_state.is_some_and(EndpointState::is_terminal) {
                let _ = reply_tx.send(Err(Error::ConnectionNotOpen));
                return Some(CloseSignal::normal(Side::Server));
            }
            if status.server_state.is_some_and(EndpointState::is_terminal) {
                let _ = reply_tx.send(Err(Error::ConnectionNotOpen));
                return Some(CloseSignal::normal(Side::Client));
            }

            trace!(id = %id, side = %side, kind = %frame.kind, "operator send");

            let result = match side {
                Side::Client => client_tx.send(frame.into_message()).await,
                Side::Server => server_tx.send(frame.into_message()).await,
            };

            let _ = reply_tx.send(result.map_err(Error::from));
            None
        }

        Some(ConnectionCommand::Close { side, code, reason }) => Some(CloseSignal {
            sender: side,
            code,
            reason,
        }),

        // Session stop, or every command sender dropped: close out.
        Some(ConnectionCommand::Shutdown) | None => Some(CloseSignal::normal(Side::Client)),
    }
}

// ============================================================================
// Stream Handling
// ============================================================================

/// Handles one inbound stream item; returns a close signal when the
/// endpoint closed or failed.
fn on_stream_item(
    side: Side,
    item: Option<std::result::Result<Message, WsError>>,
    id: ConnectionId,
    record: &ConnectionRecord,
    events: &EventSender,
) -> Option<CloseSignal> {
    match item {
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = match frame {
                Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                None => (DEFAULT_CLOSE_CODE, String::new()),
            };

            record.update_status(|status| match side {
                Side::Client => status.client_state = Some(EndpointState::Closing),
                Side::Server => status.server_state = Some(EndpointState::Closing),
            });

            Some(CloseSignal {
                sender: side,
                code,
                reason,
            })
        }

        Some(Ok(message)) => {
            // Mirror to the notification channel; forwarding is the
            // operator's decision, made through the Control API.
            if let Some(frame) = Frame::from_message(&message, side == Side::Client) {
                if side == Side::Client {
                    let size = frame.payload.len() as u64;
                    record.update_status(|status| status.bytes_received += size);
                }

                trace!(id = %id, side = %side, kind = %frame.kind, "frame observed");

                let _ = events.send(ProxyEvent::Data {
                    id,
                    sender: side,
                    payload: frame.payload,
                    kind: frame.kind,
                    flags: frame.flags,
                });
            }
            None
        }

        Some(Err(err)) => {
            let _ = events.send(ProxyEvent::side_error(side, &err));
            Some(CloseSignal::normal(side))
        }

        None => Some(CloseSignal::normal(side)),
    }
}
