//! Relay engine, connection registry, and listener.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  RelayEngine                     │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │ ConnectionRegistry                         │  │
//! │  │   id 0 → record ── relay task (gated)      │  │
//! │  │   id 1 → record ── relay task (relaying)   │  │
//! │  └────────────────────────────────────────────┘  │
//! │        │ events                                  │
//! └────────┼─────────────────────────────────────────┘
//!          ▼
//!     observer (notification channel)
//! ```
//!
//! Each relay task owns both endpoint streams for one connection and
//! mirrors traffic to the notification channel; forwarding is dispatched
//! explicitly through the engine by the Control API.

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection relay task.
pub(crate) mod connection;

/// Relay engine: pairing, gating, operator dispatch.
pub mod engine;

/// Plaintext WebSocket accept loop.
pub mod listener;

/// Connection registry and status records.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{RelayEngine, UpgradeInfo, resolve_destination};
pub use listener::RelayListener;
pub use registry::{
    ConnectionRecord, ConnectionRegistry, ConnectionStatus, EndpointState, ready_state_number,
};
