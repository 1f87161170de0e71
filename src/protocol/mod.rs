//! Frame and event types shared by the relay engine and Control API.
//!
//! # Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Frame`] | A relayed frame: kind, payload, flags |
//! | [`Side`] | Which endpoint a frame belongs to |
//! | [`ProxyEvent`] | Notification channel events for the observer |
//!
//! Dispatch values (`sender`, `method`, `datatype`) are exhaustive enums
//! parsed with `FromStr`; unknown values surface as typed errors at the
//! Control API boundary.

// ============================================================================
// Submodules
// ============================================================================

/// Notification channel event types.
pub mod event;

/// Frame, side, and payload types.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{EventReceiver, EventSender, ParsedUrl, ProxyEvent, event_channel};
pub use frame::{
    Frame, FrameFlags, FrameKind, FramePayload, PayloadFormat, Side, decode_hex_payload,
};
