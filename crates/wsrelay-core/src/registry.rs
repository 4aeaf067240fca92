//! The Connection Registry.
//!
//! A single `RwLock<HashMap>` guards the collection. Every operation holds
//! the lock only for the map access itself, so register, deregister and
//! snapshot are linearizable with each other and no lock is ever held
//! across a network send.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::connection::ConnectionEntry;
use crate::errors::DuplicateConnectionError;
use crate::ids::ConnectionId;

/// Shared directory of connected peers.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry under its own id.
    ///
    /// An id that is already present is rejected and the existing entry is
    /// left untouched.
    pub fn register(&self, entry: Arc<ConnectionEntry>) -> Result<(), DuplicateConnectionError> {
        let mut entries = self.entries.write();
        match entries.entry(entry.id().clone()) {
            Entry::Occupied(occupied) => Err(DuplicateConnectionError(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Register and return a guard that deregisters exactly once, either
    /// through [`Registration::deregister`] or when dropped.
    pub fn register_scoped(
        self: &Arc<Self>,
        entry: Arc<ConnectionEntry>,
    ) -> Result<Registration, DuplicateConnectionError> {
        let id = entry.id().clone();
        self.register(entry)?;
        Ok(Registration {
            registry: Arc::clone(self),
            id,
            released: false,
        })
    }

    /// Remove an entry. Returns whether it was present; absent ids are a no-op.
    pub fn deregister(&self, id: &ConnectionId) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Point-in-time list of every entry except `exclude`.
    pub fn snapshot_others(&self, exclude: &ConnectionId) -> Vec<Arc<ConnectionEntry>> {
        self.entries
            .read()
            .iter()
            .filter(|(id, _)| *id != exclude)
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    /// Look up one entry.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.entries.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Ids currently registered, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry. Used once, at service shutdown.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }
}

/// Scoped registration of one connection.
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    released: bool,
}

impl Registration {
    /// The registered id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Deregister now. Returns whether the entry was still present.
    pub fn deregister(mut self) -> bool {
        self.released = true;
        self.registry.deregister(&self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released && self.registry.deregister(&self.id) {
            warn!(conn_id = %self.id, "connection deregistered by scope guard");
        }
    }
}
