use crate::codec::StateValue;
use crate::error::{Result, SessionError};
use crate::path::{self, WatchPath};
use crate::registry::WatchRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque connection identity. Issued by [`ConnectionHub::attach`] and never
/// reused, so a re-attached application always starts without watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the transport knows about a newly attached application.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub label: String,
    pub snapshot: StateValue,
}

impl ConnectionInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            snapshot: StateValue::Undefined,
        }
    }

    pub fn with_snapshot(mut self, snapshot: StateValue) -> Self {
        self.snapshot = snapshot;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    label: String,
    live: bool,
    snapshot: StateValue,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Last fully known state tree.
    pub fn snapshot(&self) -> &StateValue {
        &self.snapshot
    }
}

/// Owns the attached connections, the current selection, and the watches
/// kept for each connection.
#[derive(Debug)]
pub struct ConnectionHub {
    connections: BTreeMap<ConnectionId, Connection>,
    selected: Option<ConnectionId>,
    registry: WatchRegistry,
    next_id: u64,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            selected: None,
            registry: WatchRegistry::new(),
            next_id: 1,
        }
    }

    pub fn attach(&mut self, info: ConnectionInfo) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        tracing::info!(connection_id = %id, label = %info.label, "connection attached");
        self.connections.insert(
            id,
            Connection {
                id,
                label: info.label,
                live: true,
                snapshot: info.snapshot,
            },
        );
        id
    }

    /// Remove a connection and every watch it had. Clears the selection if it
    /// pointed at this connection.
    pub fn detach(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        let dropped = self.registry.remove_connection(id);

        if self.selected == Some(id) {
            self.selected = None;
        }

        tracing::info!(connection_id = %id, dropped_watches = dropped, "connection detached");
        Some(connection)
    }

    /// `None` clears the selection. Unknown ids are rejected without change.
    pub fn select(&mut self, id: Option<ConnectionId>) -> Result<()> {
        if let Some(id) = id {
            if !self.connections.contains_key(&id) {
                return Err(SessionError::UnknownConnection(id));
            }
        }
        self.selected = id;
        Ok(())
    }

    pub fn selected(&self) -> Option<ConnectionId> {
        self.selected
    }

    pub fn set_live(&mut self, id: ConnectionId, live: bool) -> Result<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SessionError::UnknownConnection(id))?;
        if connection.live != live {
            tracing::debug!(connection_id = %id, live, "connection liveness changed");
            connection.live = live;
        }
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Connections in attach order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WatchRegistry {
        &mut self.registry
    }

    /// Store `subtree` at `root` in the connection's snapshot and refresh
    /// every watch on that path, its ancestors, or its descendants.
    ///
    /// Returns the watched paths whose value changed.
    pub fn on_state_change(
        &mut self,
        id: ConnectionId,
        root: &WatchPath,
        subtree: StateValue,
    ) -> Result<Vec<WatchPath>> {
        self.on_state_changes(id, vec![(root.clone(), subtree)])
    }

    /// Apply several writes in order. If any write is rejected the snapshot
    /// and every watch are left as they were.
    pub fn on_state_changes(
        &mut self,
        id: ConnectionId,
        changes: Vec<(WatchPath, StateValue)>,
    ) -> Result<Vec<WatchPath>> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SessionError::UnknownConnection(id))?;

        let mut roots: Vec<WatchPath> = Vec::with_capacity(changes.len());
        if changes.len() == 1 {
            // A single rejected write leaves the snapshot untouched.
            for (root, subtree) in changes {
                path::write(&mut connection.snapshot, &root, subtree)?;
                roots.push(root);
            }
        } else {
            let mut staged = connection.snapshot.clone();
            for (root, subtree) in changes {
                path::write(&mut staged, &root, subtree)?;
                roots.push(root);
            }
            connection.snapshot = staged;
        }

        let mut affected: Vec<WatchPath> = Vec::new();
        for root in &roots {
            for watched in path::affected_paths(root, self.registry.paths_for(id)) {
                if !affected.contains(&watched) {
                    affected.push(watched);
                }
            }
        }

        let mut changed = Vec::new();
        for watched in affected {
            let value = path::resolve(&connection.snapshot, &watched)
                .cloned()
                .unwrap_or_default();
            if self.registry.apply_update(id, &watched, value) {
                changed.push(watched);
            }
        }

        tracing::debug!(
            connection_id = %id,
            writes = roots.len(),
            changed = changed.len(),
            "applied state change"
        );
        Ok(changed)
    }
}
