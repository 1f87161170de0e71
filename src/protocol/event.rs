//! Notification channel event types.
//!
//! Events are one-way notifications from the relay core to the external
//! observer (the control surface / UI). Delivery is fire-and-forget over an
//! unbounded channel; the relay never blocks waiting for the observer to
//! consume an event.
//!
//! # Event Types
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `new-connection` | an upgraded connection has been paired and gated |
//! | `data` | a frame arrived on either endpoint, or a logged send replayed one |
//! | `close-connection` | the close sequence completed, naming the initiator |
//! | `error` | any per-connection or listener failure |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use crate::identifiers::ConnectionId;
use crate::protocol::frame::{FrameFlags, FrameKind, FramePayload, Side};

// ============================================================================
// Channel Aliases
// ============================================================================

/// Sending half of the notification channel.
pub type EventSender = mpsc::UnboundedSender<ProxyEvent>;

/// Receiving half of the notification channel, held by the observer.
pub type EventReceiver = mpsc::UnboundedReceiver<ProxyEvent>;

/// Creates a notification channel pair.
#[inline]
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// ============================================================================
// ParsedUrl
// ============================================================================

/// Structural components of a resolved destination URL.
///
/// Mirrors what the observer needs to render a connection row without
/// re-parsing the URL string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedUrl {
    /// URL scheme after the ws/wss rewrite.
    pub scheme: String,
    /// Host component, if any.
    pub host: Option<String>,
    /// Explicit or scheme-default port.
    pub port: Option<u16>,
    /// Path component.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
}

impl From<&Url> for ParsedUrl {
    fn from(url: &Url) -> Self {
        Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().map(str::to_string),
            port: url.port_or_known_default(),
            path: url.path().to_string(),
            query: url.query().map(str::to_string),
        }
    }
}

// ============================================================================
// ProxyEvent
// ============================================================================

/// An event on the notification channel.
///
/// Serializes with a kebab-case `event` tag so the observer can dispatch
/// on the event name:
///
/// ```json
/// { "event": "data", "id": 2, "sender": "server", "payload": "hi",
///   "kind": "ping", "flags": { "binary": false, "mask": false } }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProxyEvent {
    /// A connection has been paired with its destination and gated.
    NewConnection {
        /// Connection id.
        id: ConnectionId,
        /// Resolved destination URL.
        url: String,
        /// Parsed components of the resolved URL.
        #[serde(rename = "parsedUrl")]
        parsed_url: ParsedUrl,
    },

    /// A frame was observed on (or replayed into) a connection.
    Data {
        /// Connection id.
        id: ConnectionId,
        /// Side the frame originated from.
        sender: Side,
        /// Frame payload (binary serialized as hex).
        payload: FramePayload,
        /// Frame kind.
        kind: FrameKind,
        /// Frame flags.
        flags: FrameFlags,
    },

    /// A connection's close sequence completed.
    CloseConnection {
        /// Side that initiated the close.
        sender: Side,
        /// Connection id.
        id: ConnectionId,
    },

    /// A failure was observed.
    Error {
        /// Human-readable description, prefixed with the offending side
        /// where one is known (e.g. `[client] ...`).
        message: String,
        /// Optional detail chain.
        stack: Option<String>,
    },
}

impl ProxyEvent {
    /// Creates an error event without a detail chain.
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            stack: None,
        }
    }

    /// Creates an error event tagged with the offending side.
    #[inline]
    #[must_use]
    pub fn side_error(side: Side, message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: format!("[{side}] {message}"),
            stack: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_data_event_shape() {
        let event = ProxyEvent::Data {
            id: ConnectionId::from_u64(2),
            sender: Side::Server,
            payload: FramePayload::Text("hi".to_string()),
            kind: FrameKind::Ping,
            flags: FrameFlags::default(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "data",
                "id": 2,
                "sender": "server",
                "payload": "hi",
                "kind": "ping",
                "flags": { "binary": false, "mask": false }
            })
        );
    }

    #[test]
    fn test_new_connection_event_shape() {
        let url = Url::parse("ws://example.com/socket?x=1").unwrap();
        let event = ProxyEvent::NewConnection {
            id: ConnectionId::from_u64(0),
            url: url.to_string(),
            parsed_url: ParsedUrl::from(&url),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "new-connection");
        assert_eq!(value["parsedUrl"]["scheme"], "ws");
        assert_eq!(value["parsedUrl"]["host"], "example.com");
        assert_eq!(value["parsedUrl"]["port"], 80);
        assert_eq!(value["parsedUrl"]["path"], "/socket");
        assert_eq!(value["parsedUrl"]["query"], "x=1");
    }

    #[test]
    fn test_close_event_tag() {
        let event = ProxyEvent::CloseConnection {
            sender: Side::Client,
            id: ConnectionId::from_u64(3),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "close-connection");
        assert_eq!(value["sender"], "client");
    }

    #[test]
    fn test_side_error_prefix() {
        let event = ProxyEvent::side_error(Side::Client, "boom");
        match event {
            ProxyEvent::Error { message, .. } => assert_eq!(message, "[client] boom"),
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
