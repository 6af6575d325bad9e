//! Live connections of one server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │              Registry                │
//! │  ┌────────────────────────────────┐  │
//! │  │ ConnectionId → Arc<Connection> │  │
//! │  │ ConnectionId → Arc<Connection> │  │
//! │  └────────────────────────────────┘  │
//! └──────────────────────────────────────┘
//! ```
//!
//! Entries are added on a successful handshake and removed exactly once on
//! disconnect.

// ============================================================================
// Imports
// ============================================================================

use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::connection::Connection;

// ============================================================================
// Registry
// ============================================================================

/// Map of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<FxHashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws a connection id not currently registered.
    #[must_use]
    pub fn fresh_id(&self) -> ConnectionId {
        let connections = self.connections.read();
        let mut id = ConnectionId::generate();
        while connections.contains_key(&id) {
            id = ConnectionId::generate();
        }
        id
    }

    /// Registers a connection under its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the id is already taken.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<()> {
        match self.connections.write().entry(connection.id().clone()) {
            Entry::Occupied(entry) => Err(Error::protocol(format!(
                "Connection id already registered: {}",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                info!(connection_id = %connection.id(), kind = ?connection.kind(), "Connection registered");
                entry.insert(connection);
                Ok(())
            }
        }
    }

    /// Returns the connection with `id`, if registered.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Removes and returns the connection with `id`.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            debug!(connection_id = %id, "Connection deregistered");
        }
        removed
    }

    /// Removes and returns every connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.write().drain().map(|(_, c)| c).collect()
    }

    /// Returns the ids of all live connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connection is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
