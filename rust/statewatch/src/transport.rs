//! Boundary with the transport that talks to inspected applications.

use crate::hub::{ConnectionId, ConnectionInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Inbound notification from the transport.
#[derive(Debug)]
pub enum TransportEvent {
    Attach {
        info: ConnectionInfo,
        reply: Option<oneshot::Sender<ConnectionId>>,
    },
    Detach {
        connection_id: ConnectionId,
    },
    Liveness {
        connection_id: ConnectionId,
        live: bool,
    },
    /// `subtree` is the encoded value now stored at `root_path`.
    StateChange {
        connection_id: ConnectionId,
        root_path: String,
        subtree: Value,
    },
    /// Several changes reported together; applied in order, all or nothing.
    StateChanges {
        connection_id: ConnectionId,
        changes: Vec<StateChange>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub path: String,
    pub value: Value,
}

impl StateChange {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Advisory message for the transport. Nothing in the session depends on it
/// being delivered or honored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportHint {
    Subscribe {
        connection_id: ConnectionId,
        path: String,
    },
    Unsubscribe {
        connection_id: ConnectionId,
        path: String,
    },
}

impl TransportHint {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            TransportHint::Subscribe { connection_id, .. } => *connection_id,
            TransportHint::Unsubscribe { connection_id, .. } => *connection_id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TransportHint::Subscribe { path, .. } | TransportHint::Unsubscribe { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportHint::Subscribe { .. } => "subscribe",
            TransportHint::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// Fire-and-forget sender for [`TransportHint`]s.
#[derive(Debug, Clone, Default)]
pub struct HintSender {
    tx: Option<mpsc::Sender<TransportHint>>,
}

/// Create a bounded hint queue. The receiver belongs to the transport.
pub fn hint_channel(capacity: usize) -> (HintSender, mpsc::Receiver<TransportHint>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (HintSender { tx: Some(tx) }, rx)
}

impl HintSender {
    /// A sender that discards every hint.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn send(&self, hint: TransportHint) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(hint) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(hint)) => {
                tracing::warn!(
                    connection_id = %hint.connection_id(),
                    path = %hint.path(),
                    kind = hint.kind(),
                    "hint queue full, dropping hint"
                );
            }
            Err(mpsc::error::TrySendError::Closed(hint)) => {
                tracing::debug!(
                    connection_id = %hint.connection_id(),
                    path = %hint.path(),
                    kind = hint.kind(),
                    "hint receiver gone, dropping hint"
                );
            }
        }
    }
}
