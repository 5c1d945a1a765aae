//! Realtime connection over WebSockets.
//!
//! ```text
//!  RealtimeClient (cloneable handle, async driver task)
//!        │ lock
//!        ▼
//!  ConnectionManager (sync state machine, explicit clock)
//!        │                     ▲
//!        ▼ Connector::open     │ TransportEvents (generation, event)
//!  Transport ──────────────────┘
//! ```
//!
//! The manager owns connection state, the pending authentication, the
//! subscription set and the reconnect schedule. It never blocks and never
//! reads the clock itself, so it can be exercised directly with
//! [`MemoryConnector`]. [`RealtimeClient`] wraps it for application use:
//! transport events and timers are applied on a background task, state is
//! published as [`ConnectionSnapshot`]s, and inbound messages are fanned out
//! to listeners.

mod client;
mod connection;
mod hooks;
mod listeners;
mod manager;
mod memory;
mod subscriptions;
mod transport;

pub use client::{MessageStream, RealtimeClient};
pub use connection::{ConnectionState, ReconnectConfig};
pub use hooks::{wait_for_state, ConnectionSnapshot};
pub use listeners::{ListenerFilter, ListenerFn, ListenerId, Listeners};
pub use manager::{ConnectionManager, PendingAuth};
pub use memory::{MemoryConnector, MemoryLink, MemoryTransport};
pub use subscriptions::SubscriptionRegistry;
pub use transport::{
    Connector, Transport, TransportEvent, TransportEvents, WsConnector, WsTransport,
};
