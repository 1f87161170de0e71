//! Connection registry.
//!
//! Maps monotonically increasing connection ids to connection records.
//! Ids are unique for the lifetime of a listening session and are never
//! reused, even after a connection closes. The registry is reset (records
//! cleared, id sequence restarted) when the relay is stopped and
//! restarted.
//!
//! No registry operation blocks; lookups on unknown ids are a
//! "connection not found" condition for the caller and never fatal to the
//! registry itself.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::relay::connection::ConnectionCommand;

// ============================================================================
// EndpointState
// ============================================================================

/// Transport-level ready state of one endpoint, mirrored from the socket.
///
/// Numeric values follow the WebSocket `readyState` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Handshake in progress.
    Connecting = 0,
    /// Open for traffic.
    Open = 1,
    /// Closing handshake started.
    Closing = 2,
    /// Fully closed.
    Closed = 3,
}

impl EndpointState {
    /// Returns the numeric `readyState` value.
    #[inline]
    #[must_use]
    pub const fn as_number(self) -> i8 {
        self as i8
    }

    /// Returns `true` if the endpoint is closing or closed.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Numeric ready state for an endpoint that may be undetermined.
///
/// `-1` when no state has been observed yet.
#[inline]
#[must_use]
pub fn ready_state_number(state: Option<EndpointState>) -> i8 {
    state.map_or(-1, EndpointState::as_number)
}

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Live status of a relayed connection, shared between the relay task,
/// the engine, and the Control API.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Resolved destination URL.
    pub url: String,
    /// Payload bytes received on the client endpoint.
    pub bytes_received: u64,
    /// Negotiated WebSocket extensions of the client endpoint.
    pub extensions: String,
    /// Negotiated subprotocol of the client endpoint.
    pub protocol: String,
    /// WebSocket protocol version from the upgrade request.
    pub protocol_version: u8,
    /// Ready state of the client endpoint, if determined.
    pub client_state: Option<EndpointState>,
    /// Ready state of the server endpoint, if determined.
    pub server_state: Option<EndpointState>,
    /// Whether the readiness gate has been opened.
    pub gate_open: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            url: String::new(),
            bytes_received: 0,
            extensions: String::new(),
            protocol: String::new(),
            protocol_version: 13,
            client_state: None,
            server_state: None,
            gate_open: false,
        }
    }
}

// ============================================================================
// ConnectionRecord
// ============================================================================

/// Registry record for one relayed connection.
///
/// Holds the shared status block and, once the relay task is spawned, the
/// command channel into it.
pub struct ConnectionRecord {
    /// Connection id.
    id: ConnectionId,
    /// Shared status block.
    status: Mutex<ConnectionStatus>,
    /// Command channel into the relay task; `None` until armed.
    commands: Mutex<Option<mpsc::UnboundedSender<ConnectionCommand>>>,
}

impl ConnectionRecord {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            status: Mutex::new(ConnectionStatus::default()),
            commands: Mutex::new(None),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns a snapshot of the connection status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().clone()
    }

    /// Applies a mutation to the shared status block.
    pub fn update_status(&self, update: impl FnOnce(&mut ConnectionStatus)) {
        update(&mut self.status.lock());
    }

    /// Arms the record with the relay task's command channel.
    pub(crate) fn arm(&self, tx: mpsc::UnboundedSender<ConnectionCommand>) {
        *self.commands.lock() = Some(tx);
    }

    /// Sends a command to the relay task.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionNotOpen`] if the task was never armed or has
    /// already terminated.
    pub(crate) fn command(&self, command: ConnectionCommand) -> Result<()> {
        let guard = self.commands.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| Error::ConnectionNotOpen),
            None => Err(Error::ConnectionNotOpen),
        }
    }
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Registry of live connections, keyed by [`ConnectionId`].
///
/// Process-wide mutable state scoped to the lifetime of the active
/// listening session.
pub struct ConnectionRegistry {
    /// Next id to allocate.
    next_id: AtomicU64,
    /// Records by id.
    connections: RwLock<FxHashMap<ConnectionId, Arc<ConnectionRecord>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry with the id sequence at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            connections: RwLock::new(FxHashMap::default()),
        }
    }

    /// Allocates the next unique id and creates an empty record for it.
    pub fn allocate(&self) -> (ConnectionId, Arc<ConnectionRecord>) {
        let id = ConnectionId::from_u64(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Arc::new(ConnectionRecord::new(id));

        self.connections.write().insert(id, Arc::clone(&record));
        debug!(id = %id, "connection allocated");

        (id, record)
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.connections.read().get(&id).cloned()
    }

    /// Removes a record by id.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let removed = self.connections.write().remove(&id);
        if removed.is_some() {
            debug!(id = %id, "connection removed from registry");
        }
        removed
    }

    /// Removes a record only if it is still the one registered under `id`.
    ///
    /// Relay tasks outlive registry resets; after a reset the same id may
    /// belong to a fresh session's connection, which must not be removed
    /// by a stale task's cleanup.
    pub(crate) fn remove_entry(&self, id: ConnectionId, record: &Arc<ConnectionRecord>) {
        let mut connections = self.connections.write();
        if connections
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            connections.remove(&id);
            debug!(id = %id, "connection removed from registry");
        }
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connections are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Drains all records and restarts the id sequence at 0.
    ///
    /// Invoked when the listening session stops; the drained records are
    /// returned so the caller can shut their relay tasks down.
    pub fn reset(&self) -> Vec<Arc<ConnectionRecord>> {
        let drained: Vec<_> = {
            let mut connections = self.connections.write();
            connections.drain().map(|(_, record)| record).collect()
        };

        self.next_id.store(0, Ordering::SeqCst);
        debug!(drained = drained.len(), "registry reset");

        drained
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
