//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use statewatch::prelude::*;
//! ```

pub use crate::{
    hint_channel, ConnectionId, ConnectionInfo, RuntimeConfig, SessionConfig, SessionError,
    SessionHandle, SessionRuntime, SessionState, StateChange, StateValue, SubscriptionSession,
    TransportHint, TransportSender, VisibleWatches, Watch, WatchListView, WatchPath,
};

pub use futures_util::StreamExt;
