//! Control API.
//!
//! Request/response handler backing the interception engine's
//! `requestHandler` hook: non-upgrade HTTP requests that reach the proxy
//! port are answered here. The transport is supplied by the engine; this
//! module only sees [`ControlRequest`] and produces [`ControlResponse`].
//!
//! # Routes
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /ca.pem\|der`, `/ca_pri.*`, `/ca_pub.*` | republish CA material |
//! | `GET /ws/<id>/` | connection status |
//! | `POST /ws/<id>/<sender>/<method>/<datatype>` | frame injection |
//!
//! Send dispatch query flags: `log=true` routes the frame through the
//! notification path (it appears in the transcript as if observed on the
//! wire); otherwise the frame is written directly on the named endpoint,
//! bypassing notification. `mask=true` is passed through to the frame
//! flags.
//!
//! Unmatched routes, unparseable ids, unknown dispatch values, and sends
//! on unregistered connections answer 404. Malformed operator payloads
//! and transport failures answer 500 with `{"success":false,"reason"}`.

// ============================================================================
// Submodules
// ============================================================================

/// CA material republication.
pub mod ca;

// ============================================================================
// Imports
// ============================================================================

use std::str::FromStr;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::identifiers::ConnectionId;
use crate::protocol::frame::{Frame, FrameKind, PayloadFormat, Side};
use crate::relay::engine::RelayEngine;
use crate::relay::registry::ready_state_number;

pub use ca::{CaArtifact, CaEncoding, CertStore};

// ============================================================================
// ControlRequest
// ============================================================================

/// An HTTP-style request addressed to the Control API.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    /// Request method.
    pub method: Method,
    /// Request target: path plus optional query string.
    pub uri: String,
    /// Request body (the frame payload for send dispatch).
    pub body: String,
}

impl ControlRequest {
    /// Creates a bodyless request.
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            body: String::new(),
        }
    }

    /// Attaches a request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

// ============================================================================
// ControlResponse
// ============================================================================

/// An HTTP-style response from the Control API.
#[derive(Debug, Clone)]
pub struct ControlResponse {
    /// Response status.
    pub status: StatusCode,
    /// `Content-Type` value.
    pub content_type: &'static str,
    /// `Content-Disposition` value, set for CA artifact downloads.
    pub content_disposition: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ControlResponse {
    /// Builds a JSON response.
    #[must_use]
    pub fn json(status: StatusCode, body: &impl Serialize) -> Self {
        Self {
            status,
            content_type: "application/json",
            content_disposition: None,
            // Serialization of the response types in this module cannot fail.
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    /// Builds a plain-text response.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            content_disposition: None,
            body: body.into().into_bytes(),
        }
    }

    /// Builds an octet-stream attachment response.
    #[must_use]
    pub fn attachment(body: Vec<u8>, filename: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/octet-stream",
            content_disposition: Some(format!("attachment; filename=\"{filename}\"")),
            body,
        }
    }

    /// Builds the 404 response for unmatched or invalid requests.
    #[must_use]
    pub fn not_found(uri: &str) -> Self {
        Self::text(
            StatusCode::NOT_FOUND,
            format!("404 Not Found (or Invalid): {uri}"),
        )
    }

    /// Returns the body as UTF-8 text, for diagnostics and tests.
    #[must_use]
    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

// ============================================================================
// Status Body
// ============================================================================

/// Connection status response body.
///
/// Detail fields are present only for registered connections.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_received: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ready_state: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol_version: Option<u8>,
}

impl StatusBody {
    const DISCONNECTED: Self = Self {
        connected: false,
        bytes_received: None,
        url: None,
        extensions: None,
        ready_state: None,
        protocol: None,
        protocol_version: None,
    };
}

// ============================================================================
// Route
// ============================================================================

/// A matched Control API route.
enum Route<'a> {
    /// CA artifact download.
    CaArtifact {
        artifact: CaArtifact,
        encoding: CaEncoding,
        filename: &'a str,
    },
    /// Connection status query.
    Status(ConnectionId),
    /// Frame send dispatch. Values stay raw so unknown ones can be
    /// reported before the request is rejected.
    Send {
        id: ConnectionId,
        sender: &'a str,
        method: &'a str,
        datatype: &'a str,
    },
}

/// Matches a request method and path against the route table.
fn match_route<'a>(method: &Method, path: &'a str) -> Option<Route<'a>> {
    if *method == Method::GET {
        let ca = match path {
            "/ca.pem" => Some((CaArtifact::Certificate, CaEncoding::Pem)),
            "/ca.der" => Some((CaArtifact::Certificate, CaEncoding::Der)),
            "/ca_pri.pem" => Some((CaArtifact::PrivateKey, CaEncoding::Pem)),
            "/ca_pri.der" => Some((CaArtifact::PrivateKey, CaEncoding::Der)),
            "/ca_pub.pem" => Some((CaArtifact::PublicKey, CaEncoding::Pem)),
            "/ca_pub.der" => Some((CaArtifact::PublicKey, CaEncoding::Der)),
            _ => None,
        };

        if let Some((artifact, encoding)) = ca {
            return Some(Route::CaArtifact {
                artifact,
                encoding,
                filename: &path[1..],
            });
        }
    }

    let rest = path.strip_prefix("/ws/")?;
    let segments: Vec<&str> = rest.split('/').collect();

    if *method == Method::GET {
        if let &[id] | &[id, ""] = segments.as_slice() {
            let id = ConnectionId::from_str(id).ok()?;
            return Some(Route::Status(id));
        }
    } else if *method == Method::POST {
        if let &[id, sender, kind, datatype] | &[id, sender, kind, datatype, ""] =
            segments.as_slice()
        {
            let id = ConnectionId::from_str(id).ok()?;
            return Some(Route::Send {
                id,
                sender,
                method: kind,
                datatype,
            });
        }
    }

    None
}

// ============================================================================
// ControlApi
// ============================================================================

/// The Control API handler.
///
/// Reads and writes directly into the connection registry's live sockets
/// through the relay engine.
pub struct ControlApi {
    /// Relay engine backing send dispatch and status queries.
    engine: Arc<RelayEngine>,
    /// CA certstore view.
    certs: CertStore,
}

impl ControlApi {
    /// Creates a Control API over an engine, reading CA material from the
    /// engine's configured certstore directory.
    #[must_use]
    pub fn new(engine: Arc<RelayEngine>) -> Self {
        let certs = CertStore::new(&engine.config().certstore_dir);
        Self { engine, certs }
    }

    /// Handles one request.
    ///
    /// Never panics and never returns an error: every failure mode maps
    /// to a response.
    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        debug!(method = %request.method, uri = %request.uri, "control request");

        let Ok(url) = Url::parse(&format!("http://relay.invalid{}", request.uri)) else {
            return ControlResponse::not_found(&request.uri);
        };

        match match_route(&request.method, url.path()) {
            Some(Route::CaArtifact {
                artifact,
                encoding,
                filename,
            }) => self.handle_ca(artifact, encoding, filename),

            Some(Route::Status(id)) => self.handle_status(id),

            Some(Route::Send {
                id,
                sender,
                method,
                datatype,
            }) => {
                self.handle_send(&request, &url, id, sender, method, datatype)
                    .await
            }

            None => ControlResponse::not_found(&request.uri),
        }
    }
}

// ============================================================================
// ControlApi - Route Handlers
// ============================================================================

impl ControlApi {
    /// `GET /ca*.*`: republish a CA artifact.
    fn handle_ca(
        &self,
        artifact: CaArtifact,
        encoding: CaEncoding,
        filename: &str,
    ) -> ControlResponse {
        match self.certs.read(artifact, encoding) {
            Ok(bytes) => ControlResponse::attachment(bytes, filename),
            Err(err) => ControlResponse::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not retrieve certificate.\n\n{err}"),
            ),
        }
    }

    /// `GET /ws/<id>/`: connection status.
    fn handle_status(&self, id: ConnectionId) -> ControlResponse {
        let body = match self.engine.status(id) {
            Some(status) => StatusBody {
                connected: true,
                bytes_received: Some(status.bytes_received),
                url: Some(status.url),
                extensions: Some(status.extensions),
                ready_state: Some(ready_state_number(status.client_state)),
                protocol: Some(status.protocol),
                protocol_version: Some(status.protocol_version),
            },
            None => StatusBody::DISCONNECTED,
        };

        ControlResponse::json(StatusCode::OK, &body)
    }

    /// `POST /ws/<id>/<sender>/<method>/<datatype>`: frame injection.
    async fn handle_send(
        &self,
        request: &ControlRequest,
        url: &Url,
        id: ConnectionId,
        sender: &str,
        method: &str,
        datatype: &str,
    ) -> ControlResponse {
        let log = query_flag(url, "log");
        let mask = query_flag(url, "mask");

        if self.engine.status(id).is_none() {
            return ControlResponse::not_found(&request.uri);
        }

        let side = match Side::from_str(sender) {
            Ok(side) => side,
            Err(err) => {
                self.engine.emit_error(format!("[ws] {err}"));
                return ControlResponse::not_found(&request.uri);
            }
        };

        let kind = match FrameKind::from_str(method) {
            Ok(kind) => kind,
            Err(err) => {
                self.engine.emit_error(format!("[{sender}] {err}"));
                return ControlResponse::not_found(&request.uri);
            }
        };

        let format = match PayloadFormat::from_str(datatype) {
            Ok(format) => format,
            Err(err) => {
                self.engine.emit_error(format!("[{sender}] {err}"));
                return ControlResponse::not_found(&request.uri);
            }
        };

        let frame = match Frame::from_operator(kind, format, request.body.clone(), mask) {
            Ok(frame) => frame,
            Err(err) => {
                self.engine.emit_error(format!("[{side}] {err}"));
                return ControlResponse::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "success": false, "reason": err.to_string() }),
                );
            }
        };

        if log {
            return match self.engine.log_frame(id, side, frame) {
                Ok(()) => ControlResponse::json(StatusCode::OK, &json!({ "sent": true })),
                Err(_) => ControlResponse::not_found(&request.uri),
            };
        }

        match self.engine.send(id, side, frame).await {
            Ok(()) => ControlResponse::json(StatusCode::OK, &json!({ "success": true })),
            Err(err) if err.is_not_found() => ControlResponse::not_found(&request.uri),
            Err(err) => ControlResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "success": false, "reason": err.to_string() }),
            ),
        }
    }
}

// ============================================================================
// Query Helpers
// ============================================================================

/// Returns `true` if the query carries `name=true` or `name=y`.
fn query_flag(url: &Url, name: &str) -> bool {
    url.query_pairs()
        .any(|(key, value)| key == name && (value == "true" || value == "y"))
}

// ============================================================================
// Tests
// ============================================================================
