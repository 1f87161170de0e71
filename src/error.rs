//! Error types for the relay core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsrelay::{Result, Error};
//!
//! async fn example(engine: &RelayEngine, id: ConnectionId) -> Result<()> {
//!     engine.ready(id)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionNotOpen`], [`Error::ConnectionNotFound`] |
//! | Pairing | [`Error::InvalidDestination`] |
//! | Operator input | [`Error::UnknownSender`], [`Error::UnknownMessageKind`], [`Error::UnknownPayloadFormat`], [`Error::MalformedBinaryPayload`] |
//! | Artifacts | [`Error::Certificate`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Per-connection
/// failures never cross connection boundaries: they are reported to the
/// caller or mirrored onto the notification channel, and the registry
/// itself stays healthy.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Endpoint connection failed.
    ///
    /// Returned when a transport-level connection cannot be established
    /// or a frame cannot be written.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Endpoint is in a closing handshake, or the relay task behind it
    /// has already terminated; the frame was not sent.
    #[error("Connection is not open")]
    ConnectionNotOpen,

    /// No connection registered under the given id.
    #[error("Connection not found: {id}")]
    ConnectionNotFound {
        /// The unknown connection id.
        id: ConnectionId,
    },

    // ========================================================================
    // Pairing Errors
    // ========================================================================
    /// Upgrade URL could not be resolved to a WebSocket destination.
    ///
    /// Returned when the scheme rewrite (`http` to `ws`, `https` to `wss`)
    /// fails or the URL is unparseable.
    #[error("Invalid destination URL: {url}")]
    InvalidDestination {
        /// The offending URL.
        url: String,
    },

    // ========================================================================
    // Operator Input Errors
    // ========================================================================
    /// Unrecognized sender side in a send dispatch.
    #[error("Unknown sender '{value}' specified")]
    UnknownSender {
        /// The unrecognized sender value.
        value: String,
    },

    /// Unrecognized message kind in a send dispatch.
    #[error("Unknown message type '{value}' specified")]
    UnknownMessageKind {
        /// The unrecognized message kind.
        value: String,
    },

    /// Unrecognized payload datatype in a send dispatch.
    #[error("Unknown payload datatype '{value}' specified")]
    UnknownPayloadFormat {
        /// The unrecognized datatype value.
        value: String,
    },

    /// Binary-flagged payload that is not valid hexadecimal.
    ///
    /// Rejected before any bytes reach the wire.
    #[error("Message is not in valid hex format for conversion to binary: {message}")]
    MalformedBinaryPayload {
        /// What made the payload invalid.
        message: String,
    },

    // ========================================================================
    // Artifact Errors
    // ========================================================================
    /// CA artifact could not be read or re-encoded.
    #[error("Could not retrieve certificate: {message}")]
    Certificate {
        /// Description of the read or decode failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection-not-found error.
    #[inline]
    pub fn connection_not_found(id: ConnectionId) -> Self {
        Self::ConnectionNotFound { id }
    }

    /// Creates an invalid-destination error.
    #[inline]
    pub fn invalid_destination(url: impl Into<String>) -> Self {
        Self::InvalidDestination { url: url.into() }
    }

    /// Creates an unknown-sender error.
    #[inline]
    pub fn unknown_sender(value: impl Into<String>) -> Self {
        Self::UnknownSender {
            value: value.into(),
        }
    }

    /// Creates an unknown-message-kind error.
    #[inline]
    pub fn unknown_message_kind(value: impl Into<String>) -> Self {
        Self::UnknownMessageKind {
            value: value.into(),
        }
    }

    /// Creates an unknown-payload-format error.
    #[inline]
    pub fn unknown_payload_format(value: impl Into<String>) -> Self {
        Self::UnknownPayloadFormat {
            value: value.into(),
        }
    }

    /// Creates a malformed-binary-payload error.
    #[inline]
    pub fn malformed_binary_payload(message: impl Into<String>) -> Self {
        Self::MalformedBinaryPayload {
            message: message.into(),
        }
    }

    /// Creates a certificate error.
    #[inline]
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a missing-connection lookup.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConnectionNotFound { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("dial refused");
        assert_eq!(err.to_string(), "Connection failed: dial refused");
    }

    #[test]
    fn test_not_open_display() {
        assert_eq!(
            Error::ConnectionNotOpen.to_string(),
            "Connection is not open"
        );
    }

    #[test]
    fn test_unknown_sender_display() {
        let err = Error::unknown_sender("observer");
        assert_eq!(err.to_string(), "Unknown sender 'observer' specified");
    }

    #[test]
    fn test_unknown_message_kind_display() {
        let err = Error::unknown_message_kind("frob");
        assert_eq!(err.to_string(), "Unknown message type 'frob' specified");
    }

    #[test]
    fn test_is_not_found() {
        let err = Error::connection_not_found(ConnectionId::from_u64(7));
        assert!(err.is_not_found());
        assert!(!Error::ConnectionNotOpen.is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
