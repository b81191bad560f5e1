//! Runs a [`SubscriptionSession`] on its own task.
//!
//! The task is the single owner of the session. Transport events and user
//! commands arrive on separate queues and are applied one at a time, so
//! events from one connection are handled strictly in arrival order.

use crate::config::RuntimeConfig;
use crate::error::{Result, SessionError};
use crate::hub::{ConnectionId, ConnectionInfo};
use crate::registry::Watch;
use crate::session::{SnapshotEntry, SubscriptionSession, VisibleWatches, WatchListView};
use crate::stream::WatchListStream;
use crate::transport::{StateChange, TransportEvent};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

enum SessionCommand {
    Subscribe {
        path: String,
        reply: oneshot::Sender<Result<Watch>>,
    },
    Unsubscribe {
        path: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    Select {
        connection_id: Option<ConnectionId>,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearWatches {
        reply: oneshot::Sender<Result<usize>>,
    },
    Visible {
        reply: oneshot::Sender<VisibleWatches>,
    },
    ExportSnapshot {
        reply: oneshot::Sender<Vec<SnapshotEntry>>,
    },
    ImportSnapshot {
        entries: Vec<SnapshotEntry>,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

pub struct SessionRuntime;

impl SessionRuntime {
    /// Move `session` onto a new task. The join handle returns the session
    /// once the loop ends.
    pub fn spawn(
        session: SubscriptionSession,
        config: RuntimeConfig,
    ) -> (SessionHandle, JoinHandle<SubscriptionSession>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_size.max(1));
        let view_rx = session.watch_view();

        let task = tokio::spawn(run_session_loop(
            session,
            command_rx,
            event_rx,
            config.event_burst.max(1),
        ));

        let handle = SessionHandle {
            command_tx,
            transport: TransportSender { event_tx },
            view_rx,
        };
        (handle, task)
    }
}

async fn run_session_loop(
    mut session: SubscriptionSession,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    mut event_rx: mpsc::Receiver<TransportEvent>,
    event_burst: usize,
) -> SubscriptionSession {
    tracing::debug!(event_burst, "session loop started");
    let mut events_in_a_row = 0;

    loop {
        // After a full burst of events, a waiting command goes next.
        if events_in_a_row >= event_burst {
            events_in_a_row = 0;
            match command_rx.try_recv() {
                Ok(SessionCommand::Shutdown) => break,
                Ok(cmd) => {
                    handle_command(&mut session, cmd);
                    continue;
                }
                Err(_) => {}
            }
        }

        // Otherwise queued transport events are drained before the next
        // command, so a command observes every event sent ahead of it.
        tokio::select! {
            biased;
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        events_in_a_row += 1;
                        handle_event(&mut session, event);
                    }
                    None => break,
                }
            }
            cmd = command_rx.recv() => {
                events_in_a_row = 0;
                match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut session, cmd),
                }
            }
        }
    }

    tracing::debug!("session loop stopped");
    session
}

fn handle_command(session: &mut SubscriptionSession, cmd: SessionCommand) {
    match cmd {
        SessionCommand::Subscribe { path, reply } => {
            let _ = reply.send(session.subscribe(&path));
        }
        SessionCommand::Unsubscribe { path, reply } => {
            let _ = reply.send(session.unsubscribe(&path));
        }
        SessionCommand::Select {
            connection_id,
            reply,
        } => {
            let _ = reply.send(session.select(connection_id));
        }
        SessionCommand::ClearWatches { reply } => {
            let _ = reply.send(session.clear_watches());
        }
        SessionCommand::Visible { reply } => {
            let _ = reply.send(session.visible_watches());
        }
        SessionCommand::ExportSnapshot { reply } => {
            let _ = reply.send(session.export_snapshot());
        }
        SessionCommand::ImportSnapshot { entries, reply } => {
            let _ = reply.send(session.import_snapshot(entries));
        }
        SessionCommand::Shutdown => {}
    }
}

fn handle_event(session: &mut SubscriptionSession, event: TransportEvent) {
    let result = match event {
        TransportEvent::Attach { info, reply } => {
            let id = session.attach(info);
            if let Some(reply) = reply {
                let _ = reply.send(id);
            }
            Ok(())
        }
        TransportEvent::Detach { connection_id } => {
            if !session.detach(connection_id) {
                tracing::debug!(%connection_id, "detach for unknown connection");
            }
            Ok(())
        }
        TransportEvent::Liveness {
            connection_id,
            live,
        } => session.set_live(connection_id, live),
        TransportEvent::StateChange {
            connection_id,
            root_path,
            subtree,
        } => session
            .on_state_change(connection_id, &root_path, &subtree)
            .map(|_| ()),
        TransportEvent::StateChanges {
            connection_id,
            changes,
        } => session.on_state_changes(connection_id, changes).map(|_| ()),
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to apply transport event");
    }
}

/// Cloneable handle for the rendering side.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    transport: TransportSender,
    view_rx: watch::Receiver<Arc<WatchListView>>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::RuntimeClosed)?;
        reply_rx.await.map_err(|_| SessionError::RuntimeClosed)
    }

    pub async fn subscribe(&self, path: impl Into<String>) -> Result<Watch> {
        let path = path.into();
        self.request(|reply| SessionCommand::Subscribe { path, reply })
            .await?
    }

    pub async fn unsubscribe(&self, path: impl Into<String>) -> Result<bool> {
        let path = path.into();
        self.request(|reply| SessionCommand::Unsubscribe { path, reply })
            .await?
    }

    pub async fn select(&self, connection_id: Option<ConnectionId>) -> Result<()> {
        self.request(|reply| SessionCommand::Select {
            connection_id,
            reply,
        })
        .await?
    }

    pub async fn clear_watches(&self) -> Result<usize> {
        self.request(|reply| SessionCommand::ClearWatches { reply })
            .await?
    }

    /// Queries the session task, so it reflects every command sent before it.
    pub async fn visible_watches(&self) -> Result<VisibleWatches> {
        self.request(|reply| SessionCommand::Visible { reply }).await
    }

    pub async fn export_snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        self.request(|reply| SessionCommand::ExportSnapshot { reply })
            .await
    }

    pub async fn import_snapshot(&self, entries: Vec<SnapshotEntry>) -> Result<usize> {
        self.request(|reply| SessionCommand::ImportSnapshot { entries, reply })
            .await
    }

    /// Last published view, without a round trip to the session task.
    pub fn view(&self) -> Arc<WatchListView> {
        self.view_rx.borrow().clone()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.view().state.is_ambiguous()
    }

    pub fn changes(&self) -> WatchListStream {
        WatchListStream::new(self.view_rx.clone())
    }

    pub fn transport(&self) -> TransportSender {
        self.transport.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
    }
}

/// Cloneable sender the transport uses to feed events into the session.
#[derive(Clone)]
pub struct TransportSender {
    event_tx: mpsc::Sender<TransportEvent>,
}

impl TransportSender {
    pub async fn send(&self, event: TransportEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SessionError::RuntimeClosed)
    }

    pub async fn attach(&self, info: ConnectionInfo) -> Result<ConnectionId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(TransportEvent::Attach {
            info,
            reply: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::RuntimeClosed)
    }

    pub async fn detach(&self, connection_id: ConnectionId) -> Result<()> {
        self.send(TransportEvent::Detach { connection_id }).await
    }

    pub async fn set_live(&self, connection_id: ConnectionId, live: bool) -> Result<()> {
        self.send(TransportEvent::Liveness {
            connection_id,
            live,
        })
        .await
    }

    pub async fn state_change(
        &self,
        connection_id: ConnectionId,
        root_path: impl Into<String>,
        subtree: Value,
    ) -> Result<()> {
        self.send(TransportEvent::StateChange {
            connection_id,
            root_path: root_path.into(),
            subtree,
        })
        .await
    }

    pub async fn state_changes(
        &self,
        connection_id: ConnectionId,
        changes: Vec<StateChange>,
    ) -> Result<()> {
        self.send(TransportEvent::StateChanges {
            connection_id,
            changes,
        })
        .await
    }
}
