// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping of the live connections of a server.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use log::debug;

/// Identifies a connection for the lifetime of its server.
pub type ConnectionId = u64;

/// A copy of the state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub running: bool,
}

#[derive(Debug)]
struct Entry {
    peer: Option<SocketAddr>,
    running: Arc<AtomicBool>,
}

/// The set of live connections.
///
/// Connections register themselves on setup and are removed when their
/// [`Registration`] is dropped.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section is a single map operation, the map is
    // consistent even if another thread panicked while holding the lock.
    fn connections(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Entry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection.
    ///
    /// `running` is cleared by [`shutdown_all()`](Self::shutdown_all).
    #[must_use]
    pub fn register(
        self: &Arc<Self>,
        peer: Option<SocketAddr>,
        running: Arc<AtomicBool>,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections().insert(id, Entry { peer, running });
        debug!("Registered connection {id} from {peer:?}");
        Registration {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Removes a connection.
    ///
    /// Returns `false` if the connection was not registered.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections().remove(&id).is_some();
        if removed {
            debug!("Deregistered connection {id}");
        }
        removed
    }

    /// The registered connections, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections()
            .iter()
            .map(|(id, entry)| ConnectionInfo {
                id: *id,
                peer: entry.peer,
                running: entry.running.load(Ordering::Acquire),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }

    /// Asks all registered connections to stop.
    ///
    /// Each connection stops when it wakes up the next time, i.e. when data
    /// arrives or its read timeout elapses. Returns the number of signalled
    /// connections.
    pub fn shutdown_all(&self) -> usize {
        let connections = self.connections();
        for entry in connections.values() {
            entry.running.store(false, Ordering::Release);
        }
        debug!("Stopping {} connection(s)", connections.len());
        connections.len()
    }
}

/// Keeps a connection registered until dropped.
#[derive(Debug)]
pub struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
