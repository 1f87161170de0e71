//! Plaintext WebSocket accept loop.
//!
//! The listener is the attachment point the interception engine exposes at
//! `listen_pre` time: a bound socket whose upgrade requests become relayed
//! connections. TLS termination happens upstream; this listener only sees
//! plaintext streams.
//!
//! The handshake callback captures the request target and negotiation
//! headers so the engine can resolve the real destination before any
//! frame is read from the client.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::relay::engine::{RelayEngine, UpgradeInfo};

// ============================================================================
// Constants
// ============================================================================

/// Accept poll interval, bounding shutdown latency.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// RelayListener
// ============================================================================

/// Accepts plaintext TCP connections and upgrades them into relayed
/// WebSocket connections.
///
/// # Example
///
/// ```ignore
/// let (engine, events) = RelayEngine::new(ProxyConfig::default());
/// let listener = RelayListener::bind(Arc::clone(&engine)).await?;
/// println!("listening on {}", listener.local_addr());
/// ```
pub struct RelayListener {
    /// Engine that pairs and relays upgraded connections.
    engine: Arc<RelayEngine>,
    /// Resolved local address.
    local_addr: SocketAddr,
    /// Shutdown flag checked by the accept loop.
    shutdown: AtomicBool,
}

impl RelayListener {
    /// Binds the listener at the configured host and port and starts the
    /// accept loop.
    ///
    /// Bind failure (e.g. address in use) is surfaced once as an `error`
    /// event and the listen attempt aborts; there is no retry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(engine: Arc<RelayEngine>) -> Result<Arc<Self>> {
        let config = engine.config();
        Self::bind_addr(Arc::clone(&engine), config.host, config.port).await
    }

    /// Binds the listener at an explicit address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_addr(engine: Arc<RelayEngine>, host: IpAddr, port: u16) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(host, port);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                engine.emit_error(format!("listen failed on {addr}: {err}"));
                return Err(err.into());
            }
        };

        let local_addr = listener.local_addr()?;
        debug!(addr = %local_addr, "relay listener bound");

        let this = Arc::new(Self {
            engine,
            local_addr,
            shutdown: AtomicBool::new(false),
        });

        let accept = Arc::clone(&this);
        tokio::spawn(async move {
            accept.accept_loop(listener).await;
        });

        info!(addr = %local_addr, "relay listener started");

        Ok(this)
    }

    /// Returns the resolved local address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Signals the accept loop to stop.
    ///
    /// Live connections are unaffected; use
    /// [`RelayEngine::stop`] to close them.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// RelayListener - Accept Loop
// ============================================================================

impl RelayListener {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking the shutdown flag.
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = this.handle_connection(stream, addr).await {
                            warn!(?addr, error = %err, "upgrade handling failed");
                        }
                    });
                }
                Ok(Err(err)) => {
                    error!(error = %err, "accept failed");
                }
                Err(_) => {
                    continue;
                }
            }
        }

        debug!("accept loop terminated");
    }

    /// Upgrades one inbound stream and hands it to the engine.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "inbound TCP connection");

        let captured: Arc<Mutex<Option<UpgradeInfo>>> = Arc::new(Mutex::new(None));
        let captured_cb = Arc::clone(&captured);

        let callback = move |request: &HsRequest,
                             response: HsResponse|
              -> std::result::Result<HsResponse, ErrorResponse> {
            *captured_cb.lock() = Some(upgrade_info_from_request(request));
            Ok(response)
        };

        let client = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|err| Error::connection(format!("WebSocket upgrade failed: {err}")))?;

        let upgrade = captured
            .lock()
            .take()
            .ok_or_else(|| Error::connection("upgrade request not captured"))?;

        let id = self.engine.accept_upgraded(client, upgrade).await?;
        debug!(?addr, id = %id, "upgrade relayed");

        Ok(())
    }
}

// ============================================================================
// Handshake Capture
// ============================================================================

/// Extracts upgrade details from the handshake request.
fn upgrade_info_from_request(request: &HsRequest) -> UpgradeInfo {
    let headers = request.headers();

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    UpgradeInfo {
        url: request.uri().to_string(),
        host: headers
            .get("host")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        protocol: header("sec-websocket-protocol"),
        extensions: header("sec-websocket-extensions"),
        protocol_version: headers
            .get("sec-websocket-version")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(13),
    }
}

// ============================================================================
// Tests
// ============================================================================
