use crate::codec::StateValue;
use crate::hub::ConnectionId;
use crate::path::WatchPath;
use std::collections::HashMap;

/// A subscribed path and the last value resolved for it on one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    pub connection_id: ConnectionId,
    pub path: WatchPath,
    pub value: StateValue,
}

/// Subscribed paths per connection, in subscription order.
///
/// A `(connection, path)` pair appears at most once. Values are only ever
/// stored for paths that are watched.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: HashMap<ConnectionId, Vec<Watch>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `path`. Re-adding a watched path returns the existing watch
    /// untouched.
    pub fn add(&mut self, connection_id: ConnectionId, path: WatchPath) -> &Watch {
        self.add_with(connection_id, path, || StateValue::Undefined).0
    }

    /// Like [`add`](Self::add), but a newly created watch starts with the
    /// value produced by `seed`. The flag reports whether it was created.
    pub fn add_with<F>(
        &mut self,
        connection_id: ConnectionId,
        path: WatchPath,
        seed: F,
    ) -> (&Watch, bool)
    where
        F: FnOnce() -> StateValue,
    {
        let watches = self.watches.entry(connection_id).or_default();

        if let Some(index) = watches.iter().position(|w| w.path == path) {
            return (&watches[index], false);
        }

        tracing::debug!(%connection_id, %path, "watch added");
        watches.push(Watch {
            connection_id,
            path,
            value: seed(),
        });
        let created = watches.len() - 1;
        (&watches[created], true)
    }

    /// Returns whether a watch existed and was removed.
    pub fn remove(&mut self, connection_id: ConnectionId, path: &WatchPath) -> bool {
        let Some(watches) = self.watches.get_mut(&connection_id) else {
            return false;
        };

        let before = watches.len();
        watches.retain(|w| &w.path != path);
        let removed = watches.len() != before;

        if watches.is_empty() {
            self.watches.remove(&connection_id);
        }
        if removed {
            tracing::debug!(%connection_id, %path, "watch removed");
        }
        removed
    }

    /// Set the value of a watched path. Unwatched paths are ignored. Returns
    /// whether the stored value changed.
    pub fn apply_update(
        &mut self,
        connection_id: ConnectionId,
        path: &WatchPath,
        value: StateValue,
    ) -> bool {
        let Some(watch) = self
            .watches
            .get_mut(&connection_id)
            .and_then(|watches| watches.iter_mut().find(|w| &w.path == path))
        else {
            tracing::trace!(%connection_id, %path, "dropping update for unwatched path");
            return false;
        };

        if watch.value == value {
            return false;
        }
        watch.value = value;
        true
    }

    pub fn list_for(&self, connection_id: ConnectionId) -> &[Watch] {
        self.watches
            .get(&connection_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, connection_id: ConnectionId, path: &WatchPath) -> Option<&Watch> {
        self.list_for(connection_id).iter().find(|w| &w.path == path)
    }

    pub fn contains(&self, connection_id: ConnectionId, path: &WatchPath) -> bool {
        self.get(connection_id, path).is_some()
    }

    pub fn paths_for(&self, connection_id: ConnectionId) -> impl Iterator<Item = &WatchPath> {
        self.list_for(connection_id).iter().map(|w| &w.path)
    }

    /// Drop every watch of one connection, returning the removed paths.
    pub fn clear(&mut self, connection_id: ConnectionId) -> Vec<WatchPath> {
        self.watches
            .remove(&connection_id)
            .map(|watches| watches.into_iter().map(|w| w.path).collect())
            .unwrap_or_default()
    }

    /// Cascading delete for a detached connection. Returns how many watches
    /// were dropped.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) -> usize {
        let removed = self.clear(connection_id).len();
        if removed > 0 {
            tracing::debug!(%connection_id, removed, "dropped watches of detached connection");
        }
        removed
    }

    /// Number of connections with at least one watch.
    pub fn connection_count(&self) -> usize {
        self.watches.len()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }
}
