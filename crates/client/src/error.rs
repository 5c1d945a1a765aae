//! Client error types.
//!
//! Transport and protocol failures never cross the public API as panics: the
//! connection manager turns them into a state transition plus one of these
//! descriptors, and readiness violations are returned to the caller directly.

use serde::Serialize;

use crate::ws::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RealtimeError {
    /// The transport could not be constructed at all (bad URL, no runtime).
    #[error("failed to open transport: {0}")]
    TransportConstruction(String),
    /// The transport closed or failed without the caller asking for it.
    #[error("transport closed unexpectedly: {0}")]
    TransportClosed(String),
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("authentication timed out")]
    AuthTimeout,
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("cannot authenticate while {0}")]
    AuthNotAllowed(ConnectionState),
    #[error("cannot send while {0}")]
    NotReady(ConnectionState),
    #[error("failed to write frame: {0}")]
    Send(String),
}

/// Failure reported by a [`Transport`](crate::ws::Transport) or
/// [`Connector`](crate::ws::Connector).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("no async runtime available")]
    NoRuntime,
    #[error("transport is closed")]
    Closed,
}

/// Failure reported by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no active session")]
    NoSession,
    #[error("session has no refresh token")]
    MissingRefreshToken,
    #[error("session refresh is not available")]
    RefreshUnavailable,
    #[error("session changed during refresh")]
    SessionChanged,
    #[error("refresh request failed: {0}")]
    Http(String),
    #[error("refresh rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Failure of an authentication attempt started by the provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}
