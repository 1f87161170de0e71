//! Relay engine: pairing, gating, and operator-mediated dispatch.
//!
//! The engine owns the connection registry and the notification channel.
//! For every upgraded client connection handed over by the interception
//! engine it resolves the real destination, opens the outbound endpoint,
//! emits a `new-connection` event, and spawns the per-connection relay
//! task with the readiness gate shut.
//!
//! # Connection lifecycle
//!
//! ```text
//! ACCEPTING ── resolve URL ──▶ PAIRING ── outbound open ──▶ GATED
//!     │                           │                           │ ready
//!     │                           ▼ connect failure           ▼
//!     └────────────────────────▶ CLOSED ◀── close/error ── RELAYING
//! ```
//!
//! A pairing failure never opens the gate: the record is removed and an
//! `error` event is the only trace of the attempt.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::event::{EventReceiver, EventSender, ParsedUrl, ProxyEvent, event_channel};
use crate::protocol::frame::{Frame, Side};
use crate::relay::connection::{ConnectionCommand, DEFAULT_CLOSE_CODE, run_relay};
use crate::relay::registry::{
    ConnectionRecord, ConnectionRegistry, ConnectionStatus, EndpointState,
};

// ============================================================================
// UpgradeInfo
// ============================================================================

/// Handshake details of an upgraded client connection.
///
/// Produced by the listener's handshake callback, or assembled by the
/// interception engine when it hands a connection over directly.
#[derive(Debug, Clone)]
pub struct UpgradeInfo {
    /// Raw request target of the upgrade request (absolute form under an
    /// intercepting proxy, origin form otherwise).
    pub url: String,
    /// `Host` header, used to resolve origin-form targets.
    pub host: Option<String>,
    /// Negotiated subprotocol (`Sec-WebSocket-Protocol`).
    pub protocol: String,
    /// Negotiated extensions (`Sec-WebSocket-Extensions`).
    pub extensions: String,
    /// WebSocket protocol version (`Sec-WebSocket-Version`).
    pub protocol_version: u8,
}

impl UpgradeInfo {
    /// Creates upgrade info for a raw request target.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host: None,
            protocol: String::new(),
            extensions: String::new(),
            protocol_version: 13,
        }
    }

    /// Sets the `Host` header fallback.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

// ============================================================================
// RelayEngine
// ============================================================================

/// The relay engine.
///
/// Cheap to share: all methods take `&self`. Per-connection failures are
/// isolated to that connection's record; no failure crosses connection
/// boundaries.
pub struct RelayEngine {
    /// Relay configuration.
    config: ProxyConfig,
    /// Registry of live connections.
    registry: Arc<ConnectionRegistry>,
    /// Notification channel sender.
    events: EventSender,
}

impl RelayEngine {
    /// Creates an engine and the notification channel the observer reads.
    #[must_use]
    pub fn new(config: ProxyConfig) -> (Arc<Self>, EventReceiver) {
        let (events, receiver) = event_channel();

        let engine = Arc::new(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            events,
        });

        (engine, receiver)
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the relay configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Emits an `error` event on the notification channel.
    pub(crate) fn emit_error(&self, message: impl Into<String>) {
        let _ = self.events.send(ProxyEvent::error(message));
    }
}

// ============================================================================
// RelayEngine - Pairing
// ============================================================================

impl RelayEngine {
    /// Accepts an upgraded client connection and pairs it with the real
    /// destination.
    ///
    /// The client stream is not polled until the observer signals ready,
    /// so early frames stay buffered in the transport. On success the
    /// connection is registered, a `new-connection` event is emitted, and
    /// the gated relay task is running.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDestination`] if the upgrade URL cannot be
    ///   resolved to a ws/wss destination
    /// - [`Error::Connection`] if the destination connect fails; the
    ///   connection goes straight to closed and the gate never opens
    pub async fn accept_upgraded<S>(
        &self,
        client: WebSocketStream<S>,
        upgrade: UpgradeInfo,
    ) -> Result<ConnectionId>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let destination = resolve_destination(&upgrade).inspect_err(|err| {
            self.emit_error(err.to_string());
        })?;

        let (id, record) = self.registry.allocate();

        record.update_status(|status| {
            status.url = destination.to_string();
            status.protocol = upgrade.protocol.clone();
            status.extensions = upgrade.extensions.clone();
            status.protocol_version = upgrade.protocol_version;
            status.client_state = Some(EndpointState::Open);
            status.server_state = Some(EndpointState::Connecting);
        });

        debug!(id = %id, url = %destination, "pairing connection");

        let server = match self.dial(&destination).await {
            Ok(server) => server,
            Err(err) => {
                // Straight to closed: record removed, gate never opened.
                self.registry.remove(id);
                let _ = self.events.send(ProxyEvent::side_error(Side::Server, &err));
                warn!(id = %id, url = %destination, error = %err, "pairing failed");
                return Err(err);
            }
        };

        record.update_status(|status| status.server_state = Some(EndpointState::Open));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        record.arm(command_tx);

        let _ = self.events.send(ProxyEvent::NewConnection {
            id,
            url: destination.to_string(),
            parsed_url: ParsedUrl::from(&destination),
        });

        info!(id = %id, url = %destination, "connection gated");

        tokio::spawn(run_relay(
            id,
            client,
            server,
            command_rx,
            record,
            Arc::clone(&self.registry),
            self.events.clone(),
        ));

        Ok(id)
    }

    /// Opens the outbound endpoint to the resolved destination.
    async fn dial(&self, url: &Url) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let connector = if self.config.reject_unauthorized {
            None
        } else {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|err| Error::connection(err.to_string()))?;
            Some(Connector::NativeTls(tls))
        };

        let (server, _response) = connect_async_tls_with_config(url.as_str(), None, false, connector)
            .await
            .map_err(|err| match err {
                WsError::Io(io) => Error::connection(format!("destination connect failed: {io}")),
                other => Error::from(other),
            })?;

        Ok(server)
    }
}

// ============================================================================
// RelayEngine - Operator API
// ============================================================================

impl RelayEngine {
    /// Opens a connection's readiness gate. Idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionNotFound`] for an unregistered id.
    pub fn ready(&self, id: ConnectionId) -> Result<()> {
        self.record(id)?.command(ConnectionCommand::Ready)
    }

    /// Writes a frame on the named endpoint of a connection.
    ///
    /// The frame bypasses the notification channel; use
    /// [`log_frame`](Self::log_frame) for sends that should appear in the
    /// transcript.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] for an unregistered id
    /// - [`Error::ConnectionNotOpen`] if the relay task has terminated or
    ///   an endpoint is mid-close
    /// - [`Error::WebSocket`] if the transport write fails
    pub async fn send(&self, id: ConnectionId, side: Side, frame: Frame) -> Result<()> {
        let record = self.record(id)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        record.command(ConnectionCommand::Send {
            side,
            frame,
            reply_tx,
        })?;

        reply_rx.await?
    }

    /// Routes an operator frame through the notification path only.
    ///
    /// The frame appears on the notification channel as if it arrived from
    /// the named side; nothing is written to either endpoint.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionNotFound`] for an unregistered id.
    pub fn log_frame(&self, id: ConnectionId, side: Side, frame: Frame) -> Result<()> {
        self.record(id)?;

        let _ = self.events.send(ProxyEvent::Data {
            id,
            sender: side,
            payload: frame.payload,
            kind: frame.kind,
            flags: frame.flags,
        });

        Ok(())
    }

    /// Closes a connection, naming `side` as the initiator.
    ///
    /// Both endpoints are closed with the given code and reason.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionNotFound`] for an unregistered id.
    pub fn close(
        &self,
        id: ConnectionId,
        side: Side,
        code: Option<u16>,
        reason: Option<String>,
    ) -> Result<()> {
        self.record(id)?.command(ConnectionCommand::Close {
            side,
            code: code.unwrap_or(DEFAULT_CLOSE_CODE),
            reason: reason.unwrap_or_default(),
        })
    }

    /// Returns a status snapshot for a connection, if registered.
    #[must_use]
    pub fn status(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.registry.get(id).map(|record| record.status())
    }

    /// Stops the listening session: closes every live connection and
    /// resets the registry so a restarted session begins a fresh id
    /// sequence.
    pub fn stop(&self) {
        let drained = self.registry.reset();
        info!(connections = drained.len(), "relay session stopping");

        for record in drained {
            let _ = record.command(ConnectionCommand::Shutdown);
        }
    }

    fn record(&self, id: ConnectionId) -> Result<Arc<ConnectionRecord>> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::connection_not_found(id))
    }
}

// ============================================================================
// Destination Resolution
// ============================================================================

/// Resolves the real destination from an upgrade request.
///
/// Absolute-form targets are taken as-is; origin-form targets are resolved
/// against the `Host` header. The scheme is rewritten `http` to `ws` and
/// `https` to `wss`; ws/wss targets pass through unchanged.
///
/// # Errors
///
/// [`Error::InvalidDestination`] for unparseable targets or schemes with
/// no WebSocket equivalent.
pub fn resolve_destination(upgrade: &UpgradeInfo) -> Result<Url> {
    let raw = upgrade.url.trim();

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let host = upgrade
                .host
                .as_deref()
                .ok_or_else(|| Error::invalid_destination(raw))?;
            Url::parse(&format!("http://{host}{raw}"))
                .map_err(|_| Error::invalid_destination(raw))?
        }
        Err(_) => return Err(Error::invalid_destination(raw)),
    };

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        _ => return Err(Error::invalid_destination(raw)),
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::invalid_destination(raw))?;

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_http() {
        let upgrade = UpgradeInfo::new("http://example.com:8080/chat?room=1");
        let url = resolve_destination(&upgrade).unwrap();
        assert_eq!(url.as_str(), "ws://example.com:8080/chat?room=1");
    }

    #[test]
    fn test_resolve_absolute_https() {
        let upgrade = UpgradeInfo::new("https://example.com/feed");
        let url = resolve_destination(&upgrade).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/feed");
    }

    #[test]
    fn test_resolve_ws_passthrough() {
        let upgrade = UpgradeInfo::new("ws://example.com/feed");
        let url = resolve_destination(&upgrade).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_resolve_origin_form_uses_host() {
        let upgrade = UpgradeInfo::new("/chat").with_host("example.com:9000");
        let url = resolve_destination(&upgrade).unwrap();
        assert_eq!(url.as_str(), "ws://example.com:9000/chat");
    }

    #[test]
    fn test_resolve_origin_form_without_host_fails() {
        let upgrade = UpgradeInfo::new("/chat");
        assert!(resolve_destination(&upgrade).is_err());
    }

    #[test]
    fn test_resolve_rejects_unknown_scheme() {
        let upgrade = UpgradeInfo::new("ftp://example.com/file");
        let err = resolve_destination(&upgrade).unwrap_err();
        assert!(matches!(err, Error::InvalidDestination { .. }));
    }

    #[tokio::test]
    async fn test_ready_unknown_id_is_not_found() {
        let (engine, _events) = RelayEngine::new(ProxyConfig::default());
        let err = engine.ready(ConnectionId::from_u64(9)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_status_unknown_id_is_none() {
        let (engine, _events) = RelayEngine::new(ProxyConfig::default());
        assert!(engine.status(ConnectionId::from_u64(9)).is_none());
    }

    #[tokio::test]
    async fn test_log_frame_unknown_id_is_not_found() {
        let (engine, _events) = RelayEngine::new(ProxyConfig::default());
        let frame = Frame::from_operator(
            crate::protocol::frame::FrameKind::Message,
            crate::protocol::frame::PayloadFormat::Text,
            "hi".to_string(),
            false,
        )
        .unwrap();

        let err = engine
            .log_frame(ConnectionId::from_u64(9), Side::Client, frame)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
