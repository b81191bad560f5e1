//! # statewatch
//!
//! Live state subscriptions for developer tools that inspect a running
//! application's store.
//!
//! A [`SubscriptionSession`] keeps a list of watched paths per attached
//! application, applies the state changes the applications report, and
//! publishes an immutable [`WatchListView`] the UI renders from.
//!
//! ## Example
//!
//! ```rust,ignore
//! use statewatch::prelude::*;
//!
//! let (hints, mut hint_rx) = hint_channel(256);
//! let session = SubscriptionSession::new(SessionConfig::default()).with_hints(hints);
//! let (handle, _task) = SessionRuntime::spawn(session, RuntimeConfig::default());
//!
//! let transport = handle.transport();
//! let app = transport.attach(ConnectionInfo::new("my-app")).await?;
//! handle.subscribe("user.profile.name").await?;
//! transport.state_change(app, "user", serde_json::json!({"profile": {"name": "ada"}})).await?;
//!
//! let mut views = handle.changes();
//! while let Some(view) = views.next().await {
//!     match &view.visible {
//!         VisibleWatches::Ambiguous => println!("select a connection"),
//!         VisibleWatches::Watches(watches) => {
//!             for watch in watches {
//!                 println!("{} = {}", watch.path, watch.value);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Paths
//!
//! `a.b`, `a["b"]` and `a['b']` address the same node. Updating a path
//! refreshes watches on that path, its ancestors and its descendants.

pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod path;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use codec::{Special, StateValue, ValueCodec, ValueKind, ValueTone};
pub use config::{RuntimeConfig, SessionConfig};
pub use error::{DecodeError, PathError, Result, SessionError};
pub use hub::{Connection, ConnectionHub, ConnectionId, ConnectionInfo};
pub use path::WatchPath;
pub use registry::{Watch, WatchRegistry};
pub use runtime::{SessionHandle, SessionRuntime, TransportSender};
pub use session::{
    SessionState, SnapshotEntry, SubscriptionSession, VisibleWatches, WatchListView,
};
pub use stream::WatchListStream;
pub use telemetry::{init as init_telemetry, TelemetryConfig};
pub use transport::{hint_channel, HintSender, StateChange, TransportEvent, TransportHint};
