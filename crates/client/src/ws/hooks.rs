//! Consumer-facing view of the realtime connection.
//!
//! Application code observes connection state through these snapshots rather
//! than through transport events. A fresh snapshot is published after every
//! change; see [`RealtimeClient::watch`](super::RealtimeClient::watch).

use contested_shared::InboundMessage;
use serde::Serialize;
use tokio::sync::watch;

use super::connection::ConnectionState;
use crate::error::RealtimeError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionState,
    pub is_connected: bool,
    pub is_authenticated: bool,
    /// Recorded channels, active or deferred, in name order.
    pub subscriptions: Vec<String>,
    pub last_message: Option<InboundMessage>,
    /// Most recent failure descriptor, cleared when a transport opens.
    pub last_error: Option<RealtimeError>,
    /// Connection generation; changes whenever a new transport is created.
    pub generation: u64,
    pub reconnect_attempt: u32,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionState::Closed,
            is_connected: false,
            is_authenticated: false,
            subscriptions: Vec::new(),
            last_message: None,
            last_error: None,
            generation: 0,
            reconnect_attempt: 0,
        }
    }
}

impl ConnectionSnapshot {
    /// Short status line, e.g. for a connection indicator.
    pub fn status_label(&self) -> &'static str {
        match self.status {
            ConnectionState::Authenticated | ConnectionState::Open => "Connected",
            ConnectionState::Connecting | ConnectionState::Authenticating => "Connecting",
            ConnectionState::Closed => "Disconnected",
            ConnectionState::Error => "Connection failed",
        }
    }
}

/// Wait until the observed connection reaches `state`.
///
/// Returns `None` if the client shut down first.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    state: ConnectionState,
) -> Option<ConnectionSnapshot> {
    rx.wait_for(|snapshot| snapshot.status == state)
        .await
        .ok()
        .map(|snapshot| snapshot.clone())
}
