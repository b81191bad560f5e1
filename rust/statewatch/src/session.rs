//! The session façade the rendering layer talks to.
//!
//! [`SubscriptionSession`] ties the [`ConnectionHub`] to the value codec and
//! the outbound hint queue, decides which connection the user is looking at,
//! and publishes an immutable [`WatchListView`] whenever something visible
//! changes.
//!
//! The connection the session acts on follows the connection count and the
//! explicit selection:
//!
//! | connections | selection | state             | visible watches     |
//! |-------------|-----------|-------------------|---------------------|
//! | 0           | -         | `Empty`           | `[]`                |
//! | 1           | any       | `SingleActive`    | that connection's   |
//! | > 1         | none      | `MultiUnselected` | ambiguous marker    |
//! | > 1         | `id`      | `MultiSelected`   | the selected one's  |
//!
//! Watches are never dropped when the session becomes ambiguous; they are
//! only hidden until a connection is selected or the count drops back to 1.

use crate::codec::{StateValue, ValueCodec};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::hub::{Connection, ConnectionHub, ConnectionId, ConnectionInfo};
use crate::path::{self, WatchPath};
use crate::registry::Watch;
use crate::stream::WatchListStream;
use crate::transport::{hint_channel, HintSender, StateChange, TransportHint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    SingleActive(ConnectionId),
    MultiUnselected,
    MultiSelected(ConnectionId),
}

impl SessionState {
    /// The connection subscribe/unsubscribe act on, if any.
    pub fn active(&self) -> Option<ConnectionId> {
        match self {
            SessionState::SingleActive(id) | SessionState::MultiSelected(id) => Some(*id),
            SessionState::Empty | SessionState::MultiUnselected => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SessionState::MultiUnselected)
    }
}

/// What the watch panel should show.
#[derive(Debug, Clone, PartialEq)]
pub enum VisibleWatches {
    Watches(Vec<Watch>),
    /// Several connections and none selected. Distinct from an empty list.
    Ambiguous,
}

impl VisibleWatches {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, VisibleWatches::Ambiguous)
    }

    /// The watch list; empty when ambiguous.
    pub fn watches(&self) -> &[Watch] {
        match self {
            VisibleWatches::Watches(watches) => watches,
            VisibleWatches::Ambiguous => &[],
        }
    }
}

/// Immutable snapshot published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchListView {
    pub state: SessionState,
    pub visible: VisibleWatches,
    /// Incremented on every publish.
    pub revision: u64,
}

/// One persisted watch. Restored by connection label, since ids do not
/// survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub connection_label: String,
    pub path: String,
}

impl SnapshotEntry {
    pub fn new(connection_label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            connection_label: connection_label.into(),
            path: path.into(),
        }
    }
}

pub struct SubscriptionSession {
    hub: ConnectionHub,
    codec: ValueCodec,
    config: SessionConfig,
    hints: HintSender,
    view_tx: watch::Sender<Arc<WatchListView>>,
}

impl Default for SubscriptionSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SubscriptionSession {
    pub fn new(config: SessionConfig) -> Self {
        let initial = WatchListView {
            state: SessionState::Empty,
            visible: VisibleWatches::Watches(Vec::new()),
            revision: 0,
        };
        let (view_tx, _) = watch::channel(Arc::new(initial));

        Self {
            hub: ConnectionHub::new(),
            codec: ValueCodec::new(config.max_decode_depth),
            config,
            hints: HintSender::disconnected(),
            view_tx,
        }
    }

    pub fn with_hints(mut self, hints: HintSender) -> Self {
        self.hints = hints;
        self
    }

    /// Install a hint queue sized by `hint_queue_size`, replacing any
    /// previous sender, and return the receiving end for the transport.
    pub fn open_hint_channel(&mut self) -> mpsc::Receiver<TransportHint> {
        let (hints, rx) = hint_channel(self.config.hint_queue_size);
        self.hints = hints;
        rx
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.hub.connections()
    }

    pub fn state(&self) -> SessionState {
        let mut ids = self.hub.connections().map(Connection::id);
        match (ids.next(), ids.next(), self.hub.selected()) {
            (None, _, _) => SessionState::Empty,
            (Some(only), None, _) => SessionState::SingleActive(only),
            (Some(_), Some(_), Some(selected)) => SessionState::MultiSelected(selected),
            (Some(_), Some(_), None) => SessionState::MultiUnselected,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.state().is_ambiguous()
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.state().active()
    }

    pub fn visible_watches(&self) -> VisibleWatches {
        match self.state() {
            SessionState::Empty => VisibleWatches::Watches(Vec::new()),
            SessionState::MultiUnselected => VisibleWatches::Ambiguous,
            SessionState::SingleActive(id) | SessionState::MultiSelected(id) => {
                VisibleWatches::Watches(self.hub.registry().list_for(id).to_vec())
            }
        }
    }

    /// The most recently published view.
    pub fn view(&self) -> Arc<WatchListView> {
        self.view_tx.borrow().clone()
    }

    /// Receiver that observes every published [`WatchListView`].
    pub fn watch_view(&self) -> watch::Receiver<Arc<WatchListView>> {
        self.view_tx.subscribe()
    }

    /// [`watch_view`](Self::watch_view) as a [`Stream`](futures_util::Stream).
    pub fn changes(&self) -> WatchListStream {
        WatchListStream::new(self.watch_view())
    }

    pub fn attach(&mut self, info: ConnectionInfo) -> ConnectionId {
        let id = self.hub.attach(info);
        self.publish();
        id
    }

    /// Returns whether the connection existed.
    pub fn detach(&mut self, connection_id: ConnectionId) -> bool {
        let existed = self.hub.detach(connection_id).is_some();
        if existed {
            self.publish();
        }
        existed
    }

    pub fn set_live(&mut self, connection_id: ConnectionId, live: bool) -> Result<()> {
        self.hub.set_live(connection_id, live)
    }

    pub fn select(&mut self, connection_id: Option<ConnectionId>) -> Result<()> {
        self.hub.select(connection_id)?;
        tracing::debug!(selected = ?connection_id, "selection changed");
        self.publish();
        Ok(())
    }

    fn require_active(&self) -> Result<ConnectionId> {
        self.active_connection()
            .ok_or(SessionError::NoActiveConnection)
    }

    /// Watch `path` on the active connection.
    pub fn subscribe(&mut self, path: &str) -> Result<Watch> {
        let id = self.require_active()?;
        self.subscribe_to(id, path)
    }

    pub fn subscribe_to(&mut self, connection_id: ConnectionId, path: &str) -> Result<Watch> {
        let path = WatchPath::parse(path)?;
        let (watch, created) = self.add_watch(connection_id, path)?;
        if created {
            self.publish();
        }
        Ok(watch)
    }

    fn add_watch(
        &mut self,
        connection_id: ConnectionId,
        path: WatchPath,
    ) -> Result<(Watch, bool)> {
        let connection = self
            .hub
            .connection(connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;

        if let Some(existing) = self.hub.registry().get(connection_id, &path) {
            return Ok((existing.clone(), false));
        }

        let seed = if self.config.seed_from_snapshot {
            path::resolve(connection.snapshot(), &path)
                .cloned()
                .unwrap_or_default()
        } else {
            StateValue::Undefined
        };

        let hint_path = path.to_string();
        let (watch, created) = self
            .hub
            .registry_mut()
            .add_with(connection_id, path, || seed);
        let watch = watch.clone();

        if created {
            self.hints.send(TransportHint::Subscribe {
                connection_id,
                path: hint_path,
            });
        }
        Ok((watch, created))
    }

    /// Stop watching `path` on the active connection. Returns whether a watch
    /// was removed.
    pub fn unsubscribe(&mut self, path: &str) -> Result<bool> {
        let id = self.require_active()?;
        self.unsubscribe_from(id, path)
    }

    pub fn unsubscribe_from(&mut self, connection_id: ConnectionId, path: &str) -> Result<bool> {
        if !self.hub.contains(connection_id) {
            return Err(SessionError::UnknownConnection(connection_id));
        }
        let path = WatchPath::parse(path)?;

        let removed = self.hub.registry_mut().remove(connection_id, &path);
        if removed {
            self.hints.send(TransportHint::Unsubscribe {
                connection_id,
                path: path.to_string(),
            });
            self.publish();
        }
        Ok(removed)
    }

    /// Remove every watch on the active connection.
    pub fn clear_watches(&mut self) -> Result<usize> {
        let id = self.require_active()?;
        let removed = self.hub.registry_mut().clear(id);

        for path in &removed {
            self.hints.send(TransportHint::Unsubscribe {
                connection_id: id,
                path: path.to_string(),
            });
        }
        if !removed.is_empty() {
            self.publish();
        }
        Ok(removed.len())
    }

    /// Apply one inbound change. `subtree` is in wire form.
    ///
    /// A value that fails to decode leaves the snapshot and every watch
    /// untouched. Returns the watched paths whose value changed.
    pub fn on_state_change(
        &mut self,
        connection_id: ConnectionId,
        root_path: &str,
        subtree: &Value,
    ) -> Result<Vec<WatchPath>> {
        self.on_state_changes(connection_id, [StateChange::new(root_path, subtree.clone())])
    }

    /// Apply several changes in order. Every change is decoded and written to
    /// a staged snapshot before any watch is refreshed, so a bad entry
    /// rejects the whole batch.
    pub fn on_state_changes<I>(
        &mut self,
        connection_id: ConnectionId,
        changes: I,
    ) -> Result<Vec<WatchPath>>
    where
        I: IntoIterator<Item = StateChange>,
    {
        if !self.hub.contains(connection_id) {
            return Err(SessionError::UnknownConnection(connection_id));
        }

        let mut decoded = Vec::new();
        for change in changes {
            let root = WatchPath::parse(&change.path)?;
            let value = self.codec.decode(&change.value).map_err(|e| {
                tracing::warn!(
                    %connection_id,
                    path = %change.path,
                    error = %e,
                    "discarding undecodable state change"
                );
                e
            })?;
            decoded.push((root, value));
        }

        let changed = self
            .hub
            .on_state_changes(connection_id, decoded)
            .map_err(|e| {
                tracing::warn!(%connection_id, error = %e, "rejected state change");
                e
            })?;

        if !changed.is_empty() {
            self.publish();
        }
        Ok(changed)
    }

    /// Every watch as `(connection label, path)`, in attach then subscribe
    /// order.
    pub fn export_snapshot(&self) -> Vec<SnapshotEntry> {
        self.hub
            .connections()
            .flat_map(|connection| {
                self.hub
                    .registry()
                    .paths_for(connection.id())
                    .map(move |path| SnapshotEntry::new(connection.label(), path.to_string()))
            })
            .collect()
    }

    /// Re-subscribe persisted watches. Each entry goes to the earliest
    /// attached live connection with a matching label; entries without one
    /// are skipped. Returns how many watches were created.
    pub fn import_snapshot<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = SnapshotEntry>,
    {
        let mut restored = 0;

        for entry in entries {
            let target = self
                .hub
                .connections()
                .find(|c| c.is_live() && c.label() == entry.connection_label)
                .map(Connection::id);
            let Some(connection_id) = target else {
                tracing::debug!(
                    label = %entry.connection_label,
                    path = %entry.path,
                    "no live connection for persisted watch"
                );
                continue;
            };

            let path = match WatchPath::parse(&entry.path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "skipping persisted watch");
                    continue;
                }
            };

            match self.add_watch(connection_id, path) {
                Ok((_, true)) => restored += 1,
                Ok((_, false)) => {}
                Err(e) => tracing::warn!(error = %e, "failed to restore persisted watch"),
            }
        }

        if restored > 0 {
            self.publish();
        }
        tracing::info!(restored, "imported watch snapshot");
        restored
    }

    fn publish(&self) {
        let state = self.state();
        let visible = self.visible_watches();

        self.view_tx.send_if_modified(|view| {
            if view.state == state && view.visible == visible {
                return false;
            }
            if view.state != state {
                tracing::debug!(from = ?view.state, to = ?state, "session state changed");
            }
            *view = Arc::new(WatchListView {
                state,
                visible,
                revision: view.revision + 1,
            });
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with_hints() -> (SubscriptionSession, mpsc::Receiver<TransportHint>) {
        let mut session = SubscriptionSession::new(SessionConfig::new().with_hint_queue_size(16));
        let rx = session.open_hint_channel();
        (session, rx)
    }

    fn paths(visible: &VisibleWatches) -> Vec<String> {
        visible.watches().iter().map(|w| w.path.to_string()).collect()
    }

    #[test]
    fn test_state_machine() {
        let mut session = SubscriptionSession::default();
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.visible_watches(), VisibleWatches::Watches(vec![]));
        assert!(!session.is_ambiguous());

        let a = session.attach(ConnectionInfo::new("a"));
        assert_eq!(session.state(), SessionState::SingleActive(a));

        let b = session.attach(ConnectionInfo::new("b"));
        assert_eq!(session.state(), SessionState::MultiUnselected);
        assert!(session.visible_watches().is_ambiguous());

        session.select(Some(b)).unwrap();
        assert_eq!(session.state(), SessionState::MultiSelected(b));

        session.detach(b);
        assert_eq!(session.state(), SessionState::SingleActive(a));

        session.detach(a);
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[test]
    fn test_subscribe_without_active_connection() {
        let mut session = SubscriptionSession::default();
        assert!(matches!(
            session.subscribe("a"),
            Err(SessionError::NoActiveConnection)
        ));

        session.attach(ConnectionInfo::new("a"));
        session.attach(ConnectionInfo::new("b"));
        assert!(matches!(
            session.subscribe("a"),
            Err(SessionError::NoActiveConnection)
        ));
        assert!(matches!(
            session.unsubscribe("a"),
            Err(SessionError::NoActiveConnection)
        ));
        assert_eq!(session.hub().registry().watch_count(), 0);
    }

    #[test]
    fn test_invalid_path_is_rejected_without_mutation() {
        let mut session = SubscriptionSession::default();
        let id = session.attach(ConnectionInfo::new("a"));
        let revision = session.view().revision;

        assert!(matches!(
            session.subscribe("a..b"),
            Err(SessionError::InvalidPath(_))
        ));
        assert!(session.hub().registry().list_for(id).is_empty());
        assert_eq!(session.view().revision, revision);
    }

    #[test]
    fn test_ambiguity_hides_but_keeps_watches() {
        let mut session = SubscriptionSession::default();
        let a = session.attach(ConnectionInfo::new("a"));
        session.subscribe("x").unwrap();

        let b = session.attach(ConnectionInfo::new("b"));
        assert!(session.visible_watches().is_ambiguous());
        assert_eq!(session.hub().registry().list_for(a).len(), 1);

        session.detach(b);
        assert_eq!(paths(&session.visible_watches()), vec!["x"]);
    }

    #[test]
    fn test_subscribe_seeds_from_snapshot() {
        let mut session = SubscriptionSession::default();
        let snapshot = ValueCodec::default()
            .decode(&json!({"user": {"name": "ada"}}))
            .unwrap();
        session.attach(ConnectionInfo::new("app").with_snapshot(snapshot));

        let watch = session.subscribe("user.name").unwrap();
        assert_eq!(watch.value, StateValue::from("ada"));

        let missing = session.subscribe("user.age").unwrap();
        assert_eq!(missing.value, StateValue::Undefined);
    }

    #[test]
    fn test_seeding_can_be_disabled() {
        let mut session =
            SubscriptionSession::new(SessionConfig::default().with_seed_from_snapshot(false));
        let snapshot = ValueCodec::default().decode(&json!({"a": 1})).unwrap();
        session.attach(ConnectionInfo::new("app").with_snapshot(snapshot));

        assert_eq!(session.subscribe("a").unwrap().value, StateValue::Undefined);
    }

    #[test]
    fn test_hints_follow_local_changes() {
        let (mut session, mut rx) = session_with_hints();
        let id = session.attach(ConnectionInfo::new("app"));

        session.subscribe("a.b").unwrap();
        session.subscribe("a[\"b\"]").unwrap();
        session.unsubscribe("a.b").unwrap();
        session.unsubscribe("a.b").unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            TransportHint::Subscribe {
                connection_id: id,
                path: "a.b".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportHint::Unsubscribe {
                connection_id: id,
                path: "a.b".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_decode_error_keeps_last_good_value() {
        let mut session = SubscriptionSession::default();
        let id = session.attach(ConnectionInfo::new("app"));
        session.subscribe("a").unwrap();
        session.on_state_change(id, "a", &json!(1)).unwrap();

        let err = session
            .on_state_change(id, "a", &json!("~~~ bogus ~~~"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
        assert_eq!(
            session.visible_watches().watches()[0].value,
            StateValue::from(1i64)
        );
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut session = SubscriptionSession::default();
        let id = session.attach(ConnectionInfo::new("app"));
        session.subscribe("a").unwrap();
        session.subscribe("b").unwrap();

        let result = session.on_state_changes(
            id,
            vec![
                StateChange::new("a", json!(1)),
                StateChange::new("b", json!("~~~ bogus ~~~")),
            ],
        );
        assert!(result.is_err());
        assert_eq!(
            session.hub().registry().get(id, &WatchPath::parse("a").unwrap()).unwrap().value,
            StateValue::Undefined
        );

        let changed = session
            .on_state_changes(
                id,
                vec![
                    StateChange::new("a", json!(1)),
                    StateChange::new("b", json!(2)),
                    StateChange::new("a", json!(3)),
                ],
            )
            .unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(
            session.visible_watches().watches()[0].value,
            StateValue::from(3i64)
        );
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut session = SubscriptionSession::default();
        let id = session.attach(ConnectionInfo::new("app"));
        session.subscribe("list").unwrap();
        session.on_state_change(id, "list", &json!([1, 2])).unwrap();
        let revision = session.view().revision;

        let err = session
            .on_state_change(id, "list[18446744073709551615]", &json!(1))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidPath(_)));
        let err = session
            .on_state_changes(
                id,
                vec![
                    StateChange::new("list[2]", json!(3)),
                    StateChange::new("list[1000000000]", json!(4)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidPath(_)));

        assert_eq!(session.view().revision, revision);
        assert_eq!(
            session.visible_watches().watches()[0].value.display_text(),
            "[1,2]"
        );

        session.on_state_change(id, "list[2]", &json!(3)).unwrap();
        assert_eq!(
            session.visible_watches().watches()[0].value.display_text(),
            "[1,2,3]"
        );
    }

    #[test]
    fn test_clear_watches() {
        let (mut session, mut rx) = session_with_hints();
        session.attach(ConnectionInfo::new("app"));
        session.subscribe("a").unwrap();
        session.subscribe("b").unwrap();
        while rx.try_recv().is_ok() {}

        assert_eq!(session.clear_watches().unwrap(), 2);
        assert!(session.visible_watches().watches().is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            TransportHint::Unsubscribe { .. }
        ));
    }

    #[test]
    fn test_publish_only_on_visible_change() {
        let mut session = SubscriptionSession::default();
        let id = session.attach(ConnectionInfo::new("app"));
        let after_attach = session.view().revision;
        assert_eq!(after_attach, 1);

        session.on_state_change(id, "unwatched", &json!(1)).unwrap();
        assert_eq!(session.view().revision, after_attach);

        session.subscribe("a").unwrap();
        session.subscribe("a").unwrap();
        assert_eq!(session.view().revision, after_attach + 1);

        session.on_state_change(id, "a", &json!(5)).unwrap();
        session.on_state_change(id, "a", &json!(5)).unwrap();
        assert_eq!(session.view().revision, after_attach + 2);
    }

    #[test]
    fn test_explicit_connection_operations() {
        let mut session = SubscriptionSession::default();
        let a = session.attach(ConnectionInfo::new("a"));
        let b = session.attach(ConnectionInfo::new("b"));

        session.subscribe_to(b, "x").unwrap();
        assert!(session.hub().registry().list_for(a).is_empty());
        assert!(session.unsubscribe_from(b, "x").unwrap());

        let ghost = ConnectionId(999);
        assert!(matches!(
            session.subscribe_to(ghost, "x"),
            Err(SessionError::UnknownConnection(_))
        ));
        assert!(matches!(
            session.unsubscribe_from(ghost, "x"),
            Err(SessionError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_snapshot_export_import() {
        let mut session = SubscriptionSession::default();
        session.attach(ConnectionInfo::new("mobile"));
        session.subscribe("user.name").unwrap();
        session.subscribe("cart[\"items\"]").unwrap();
        let b = session.attach(ConnectionInfo::new("web"));
        session.subscribe_to(b, "theme").unwrap();

        let exported = session.export_snapshot();
        assert_eq!(
            exported,
            vec![
                SnapshotEntry::new("mobile", "user.name"),
                SnapshotEntry::new("mobile", "cart.items"),
                SnapshotEntry::new("web", "theme"),
            ]
        );

        let mut restored = SubscriptionSession::default();
        let mobile = restored.attach(ConnectionInfo::new("mobile"));
        let offline = restored.attach(ConnectionInfo::new("web"));
        restored.set_live(offline, false).unwrap();

        assert_eq!(restored.import_snapshot(exported.clone()), 2);
        assert_eq!(restored.hub().registry().list_for(mobile).len(), 2);
        assert!(restored.hub().registry().list_for(offline).is_empty());

        // Already present entries are not counted twice.
        assert_eq!(restored.import_snapshot(exported), 0);
    }
}
