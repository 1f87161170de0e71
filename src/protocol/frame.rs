//! Frame model for relayed traffic.
//!
//! A [`Frame`] is one of three kinds (`message`, `ping`, `pong`) carrying a
//! text or binary payload plus flags. Frames are transient: they are
//! forwarded and mirrored to the notification channel, never persisted.
//!
//! Dispatch values that arrive as strings over the Control API (`sender`,
//! `method`, `datatype`) parse into exhaustive enums here, so an unknown
//! value is an explicitly-handled error instead of a stringly-typed branch.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

// ============================================================================
// Side
// ============================================================================

/// Which side of a relayed connection a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The intercepted browser-side endpoint.
    Client,
    /// The outbound endpoint to the real destination.
    Server,
}

impl Side {
    /// Returns the canonical lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(Error::unknown_sender(other)),
        }
    }
}

// ============================================================================
// FrameKind
// ============================================================================

/// Kind of a relayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Data frame (text or binary).
    Message,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl FrameKind {
    /// Returns the canonical lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "message" => Ok(Self::Message),
            "ping" => Ok(Self::Ping),
            "pong" => Ok(Self::Pong),
            other => Err(Error::unknown_message_kind(other)),
        }
    }
}

// ============================================================================
// PayloadFormat
// ============================================================================

/// Declared datatype of an operator-submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Plain ASCII text.
    Ascii,
    /// Plain text (alias of `ascii` on the wire).
    Text,
    /// Binary; the request body is hexadecimal text.
    Binary,
}

impl PayloadFormat {
    /// Returns `true` if this format produces a binary frame.
    #[inline]
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::Binary)
    }
}

impl FromStr for PayloadFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ascii" => Ok(Self::Ascii),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(Error::unknown_payload_format(other)),
        }
    }
}

// ============================================================================
// FrameFlags
// ============================================================================

/// Flags attached to a frame and mirrored into `data` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameFlags {
    /// Payload is binary.
    pub binary: bool,
    /// Frame is (or is to be) masked on the wire.
    pub mask: bool,
}

// ============================================================================
// FramePayload
// ============================================================================

/// Payload of a relayed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// UTF-8 text payload.
    Text(String),
    /// Raw binary payload.
    Binary(Vec<u8>),
}

impl FramePayload {
    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }
}

/// Binary payloads serialize as lowercase hex, matching the textual form
/// operators submit them in.
impl Serialize for FramePayload {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Binary(bytes) => serializer.serialize_str(&hex::encode(bytes)),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single relayed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Frame payload.
    pub payload: FramePayload,
    /// Frame flags.
    pub flags: FrameFlags,
}

impl Frame {
    /// Builds a frame from an operator-submitted request body.
    ///
    /// A `binary`-datatype body is interpreted as hexadecimal text and
    /// decoded; anything else becomes a text payload.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedBinaryPayload`] if the body is binary-flagged but
    /// not valid hex (empty, leading non-hex digit, odd length, or a
    /// non-hex character anywhere).
    pub fn from_operator(
        kind: FrameKind,
        format: PayloadFormat,
        body: String,
        mask: bool,
    ) -> Result<Self> {
        let flags = FrameFlags {
            binary: format.is_binary(),
            mask,
        };

        let payload = if format.is_binary() {
            FramePayload::Binary(decode_hex_payload(&body)?)
        } else {
            FramePayload::Text(body)
        };

        Ok(Self {
            kind,
            payload,
            flags,
        })
    }

    /// Builds a frame from an inbound transport message.
    ///
    /// Returns `None` for close frames and raw frames, which are handled
    /// by the relay loop directly.
    #[must_use]
    pub fn from_message(message: &Message, masked: bool) -> Option<Self> {
        let (kind, payload, binary) = match message {
            Message::Text(text) => (
                FrameKind::Message,
                FramePayload::Text(text.to_string()),
                false,
            ),
            Message::Binary(bytes) => (
                FrameKind::Message,
                FramePayload::Binary(bytes.to_vec()),
                true,
            ),
            Message::Ping(bytes) => (FrameKind::Ping, FramePayload::Binary(bytes.to_vec()), true),
            Message::Pong(bytes) => (FrameKind::Pong, FramePayload::Binary(bytes.to_vec()), true),
            Message::Close(_) | Message::Frame(_) => return None,
        };

        Some(Self {
            kind,
            payload,
            flags: FrameFlags {
                binary,
                mask: masked,
            },
        })
    }

    /// Converts the frame into an outbound transport message.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self.kind {
            FrameKind::Message => {
                if self.flags.binary {
                    Message::Binary(self.payload.as_bytes().to_vec().into())
                } else {
                    match self.payload {
                        FramePayload::Text(text) => Message::Text(text.into()),
                        FramePayload::Binary(bytes) => Message::Binary(bytes.into()),
                    }
                }
            }
            FrameKind::Ping => Message::Ping(self.payload.as_bytes().to_vec().into()),
            FrameKind::Pong => Message::Pong(self.payload.as_bytes().to_vec().into()),
        }
    }
}

// ============================================================================
// Hex Decoding
// ============================================================================

/// Decodes an operator-submitted hexadecimal payload.
///
/// The payload must start with a hex digit and have even length; every
/// character must be a hex digit.
///
/// # Errors
///
/// [`Error::MalformedBinaryPayload`] describing the first violation found.
pub fn decode_hex_payload(text: &str) -> Result<Vec<u8>> {
    let starts_hex = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_hexdigit());

    if !starts_hex {
        return Err(Error::malformed_binary_payload(
            "payload does not start with a hex digit",
        ));
    }

    if text.len() % 2 != 0 {
        return Err(Error::malformed_binary_payload("odd number of hex digits"));
    }

    hex::decode(text).map_err(|e| Error::malformed_binary_payload(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
