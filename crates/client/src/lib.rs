//! Contested realtime client.
//!
//! One WebSocket connection per application: a connection state machine with
//! authentication handshake, deferred channel subscriptions, listener fan-out
//! and bounded reconnect, plus a provider that keeps it in step with the
//! signed-in session.

pub mod auth_session;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod ws;

pub use auth_session::{AuthContext, AuthSession, NoRefresh, SessionRefresher, SupabaseRefresher};
pub use config::{ProviderConfig, RealtimeConfig};
pub use error::{AuthError, ConfigError, ProviderError, RealtimeError, TransportError};
pub use provider::RealtimeProvider;
pub use ws::{ConnectionSnapshot, ConnectionState, ListenerFilter, MessageStream, RealtimeClient};
