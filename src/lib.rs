//! wsrelay - Operator-mediated WebSocket interception relay.
//!
//! This library is the live-traffic core of an interactive WebSocket
//! interception tool. For every upgraded connection accepted from a
//! client it opens a matching connection to the real destination, mirrors
//! frames in both directions to a notification channel, and exposes a
//! Control API for pausing, inspecting, injecting, and replaying traffic.
//!
//! # Architecture
//!
//! The relay is deliberately not a transparent pass-through:
//!
//! - **Gated start**: both endpoints stay paused until the observer
//!   signals ready, so no frame is ever delivered to an observer that has
//!   not yet attached.
//! - **Operator-mediated forwarding**: every inbound frame is surfaced on
//!   the notification channel; it reaches the opposite endpoint only when
//!   the operator dispatches a send through the Control API
//!   (log-and-forward or log-and-drop).
//!
//! TLS interception, UI, and preference persistence live in external
//! collaborators; this crate only relays, gates, and reports.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wsrelay::{ControlApi, ProxyConfig, ProxyEvent, RelayEngine, RelayListener, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ProxyConfig::new().with_port(0);
//!     let (engine, mut events) = RelayEngine::new(config);
//!
//!     let listener = RelayListener::bind(Arc::clone(&engine)).await?;
//!     println!("relaying on {}", listener.local_addr());
//!
//!     let control = ControlApi::new(Arc::clone(&engine));
//!
//!     while let Some(event) = events.recv().await {
//!         if let ProxyEvent::NewConnection { id, url, .. } = event {
//!             println!("connection {id} -> {url}");
//!             engine.ready(id)?;
//!         }
//!     }
//!
//!     drop(control);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Relay configuration |
//! | [`control`] | Control API: status, send dispatch, CA republication |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe connection ids |
//! | [`protocol`] | Frame and notification event types |
//! | [`relay`] | Relay engine, registry, and listener |

// ============================================================================
// Modules
// ============================================================================

/// Relay configuration.
pub mod config;

/// Control API: status queries, frame injection, CA material.
pub mod control;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe connection identifiers.
pub mod identifiers;

/// Frame and notification event types.
pub mod protocol;

/// Relay engine, connection registry, and listener.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::ProxyConfig;

// Control API
pub use control::{CaArtifact, CaEncoding, CertStore, ControlApi, ControlRequest, ControlResponse};

// Error types
pub use error::{Error, Result};

// Identifiers
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{
    EventReceiver, EventSender, Frame, FrameFlags, FrameKind, FramePayload, ParsedUrl,
    PayloadFormat, ProxyEvent, Side,
};

// Relay types
pub use relay::{
    ConnectionRegistry, ConnectionStatus, EndpointState, RelayEngine, RelayListener, UpgradeInfo,
};
