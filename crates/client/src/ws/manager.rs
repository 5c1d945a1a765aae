//! Connection manager state machine.
//!
//! ```text
//! closed --connect()--> connecting --transport open--> open
//! open --authenticate()--> authenticating --ack--> authenticated
//! authenticating --timeout/nack--> open
//! connecting/open/authenticating/authenticated --transport loss--> closed --backoff--> connecting
//!                                                               \--attempts exhausted--> error
//! ```
//!
//! The manager is synchronous and owns no timers of its own: callers pass the
//! current [`Instant`] and poll [`ConnectionManager::next_deadline`]. This keeps every
//! transition reproducible in tests; [`RealtimeClient`](super::RealtimeClient) drives
//! it from a tokio task.

use std::time::{Duration, Instant};

use contested_shared::{InboundMessage, OutboundMessage};
use serde_json::Value;

use super::connection::ConnectionState;
use super::hooks::ConnectionSnapshot;
use super::subscriptions::SubscriptionRegistry;
use super::transport::{Connector, Transport, TransportEvent};
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;

/// The single outstanding authentication attempt.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    token: String,
    deadline: Instant,
}

impl PendingAuth {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

pub struct ConnectionManager<C: Connector> {
    config: RealtimeConfig,
    connector: C,
    transport: Option<C::Transport>,
    /// Incremented for every transport and on disconnect; older events are stale.
    generation: u64,
    state: ConnectionState,
    pending_auth: Option<PendingAuth>,
    subscriptions: SubscriptionRegistry,
    /// Reconnect attempts since the last successful open.
    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    last_message: Option<InboundMessage>,
    last_error: Option<RealtimeError>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(config: RealtimeConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            transport: None,
            generation: 0,
            state: ConnectionState::Closed,
            pending_auth: None,
            subscriptions: SubscriptionRegistry::new(),
            reconnect_attempt: 0,
            reconnect_at: None,
            last_message: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn pending_auth(&self) -> Option<&PendingAuth> {
        self.pending_auth.as_ref()
    }

    pub fn last_message(&self) -> Option<&InboundMessage> {
        self.last_message.as_ref()
    }

    pub fn last_error(&self) -> Option<&RealtimeError> {
        self.last_error.as_ref()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Open a transport unless one is already connecting or open.
    ///
    /// A scheduled reconnect is replaced by an immediate attempt.
    pub fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Open
                | ConnectionState::Authenticating
                | ConnectionState::Authenticated
        ) {
            tracing::debug!(state = %self.state, "connect ignored");
            return;
        }
        self.reconnect_at = None;
        self.reconnect_attempt = 0;
        self.open_transport();
    }

    /// Close the transport and stay closed. Recorded subscriptions are kept.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
        self.pending_auth = None;
        self.reconnect_at = None;
        self.reconnect_attempt = 0;
        self.subscriptions.deactivate_all();
        self.set_state(ConnectionState::Closed);
    }

    /// Send an auth request and arm the auth timeout.
    ///
    /// Calling again while a previous attempt is outstanding replaces it.
    pub fn authenticate(&mut self, token: &str, now: Instant) -> Result<(), RealtimeError> {
        if !matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Authenticating
        ) {
            tracing::warn!(state = %self.state, "authenticate rejected");
            return Err(RealtimeError::AuthNotAllowed(self.state));
        }

        self.write(&OutboundMessage::Auth {
            token: token.to_string(),
        })?;
        let previous = self.pending_auth.replace(PendingAuth {
            token: token.to_string(),
            deadline: now + self.config.auth_timeout,
        });
        if previous.is_some() {
            tracing::debug!("auth timeout re-armed");
        }
        self.set_state(ConnectionState::Authenticating);
        Ok(())
    }

    /// Record a channel. Returns false if it was already recorded.
    ///
    /// The subscribe frame goes out immediately when authenticated, otherwise on
    /// the next successful handshake.
    pub fn subscribe(&mut self, channel: &str) -> bool {
        if !self.subscriptions.insert(channel) {
            return false;
        }
        if self.state.is_authenticated() {
            self.activate(channel);
        } else {
            tracing::debug!(channel, state = %self.state, "subscribe deferred");
        }
        true
    }

    /// Forget a channel. Returns false if it was not recorded.
    pub fn unsubscribe(&mut self, channel: &str) -> bool {
        if !self.subscriptions.remove(channel) {
            return false;
        }
        if self.state.is_authenticated() && self.subscriptions.is_active(channel) {
            self.deactivate(channel);
        }
        true
    }

    /// Publish `content` on `channel`. Not queued: fails unless open or authenticated.
    pub fn send_message(&mut self, channel: &str, content: Value) -> Result<(), RealtimeError> {
        self.send(OutboundMessage::Message {
            channel: channel.to_string(),
            content,
        })
    }

    pub fn ping(&mut self) -> Result<(), RealtimeError> {
        self.send(OutboundMessage::Ping)
    }

    /// Apply a transport event. Returns the decoded message when it should be
    /// fanned out to listeners.
    pub fn handle_transport_event(
        &mut self,
        generation: u64,
        event: TransportEvent,
        now: Instant,
    ) -> Option<InboundMessage> {
        if generation != self.generation || self.transport.is_none() {
            tracing::trace!(generation, current = self.generation, "stale transport event");
            return None;
        }

        match event {
            TransportEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.reconnect_attempt = 0;
                    self.last_error = None;
                    self.set_state(ConnectionState::Open);
                }
                None
            }
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Closed { code, reason } => {
                let reason = match code {
                    Some(code) => format!("{reason} (code {code})"),
                    None => reason,
                };
                self.handle_transport_loss(reason, now);
                None
            }
            TransportEvent::Error(reason) => {
                self.handle_transport_loss(reason, now);
                None
            }
        }
    }

    /// Fire every timer whose deadline is at or before `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if self
            .pending_auth
            .as_ref()
            .is_some_and(|pending| pending.deadline <= now)
        {
            self.pending_auth = None;
            if self.state == ConnectionState::Authenticating {
                tracing::warn!("authentication timed out");
                self.last_error = Some(RealtimeError::AuthTimeout);
                self.set_state(ConnectionState::Open);
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.reconnect_attempt += 1;
            tracing::info!(attempt = self.reconnect_attempt, "reconnecting");
            self.open_transport();
        }
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let auth = self.pending_auth.as_ref().map(|pending| pending.deadline);
        auth.into_iter().chain(self.reconnect_at).min()
    }

    /// Time until the next timer fires, measured from `now`.
    pub fn time_to_deadline(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.state,
            is_connected: self.state.is_connected(),
            is_authenticated: self.state.is_authenticated(),
            subscriptions: self.subscriptions.channels().map(str::to_owned).collect(),
            last_message: self.last_message.clone(),
            last_error: self.last_error.clone(),
            generation: self.generation,
            reconnect_attempt: self.reconnect_attempt,
        }
    }

    fn open_transport(&mut self) {
        self.generation += 1;
        match self.connector.open(&self.config.url, self.generation) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => {
                tracing::error!(url = %self.config.url, error = %e, "failed to open transport");
                self.transport = None;
                self.last_error = Some(RealtimeError::TransportConstruction(e.to_string()));
                self.set_state(ConnectionState::Error);
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> Option<InboundMessage> {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed frame");
                return None;
            }
        };

        if let Some(outcome) = message.auth_result() {
            self.handle_auth_result(outcome);
        }
        self.last_message = Some(message.clone());
        Some(message)
    }

    fn handle_auth_result(&mut self, outcome: Result<(), String>) {
        if self.state != ConnectionState::Authenticating {
            tracing::debug!(state = %self.state, "ignoring auth_ack without an outstanding attempt");
            return;
        }
        self.pending_auth = None;

        match outcome {
            Ok(()) => {
                self.set_state(ConnectionState::Authenticated);
                self.flush_subscriptions();
            }
            Err(reason) => {
                tracing::warn!(%reason, "authentication rejected");
                self.last_error = Some(RealtimeError::AuthRejected(reason));
                self.set_state(ConnectionState::Open);
            }
        }
    }

    fn handle_transport_loss(&mut self, reason: String, now: Instant) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.pending_auth = None;
        self.subscriptions.deactivate_all();
        tracing::warn!(%reason, state = %self.state, "transport lost");
        self.last_error = Some(RealtimeError::TransportClosed(reason));

        let reconnect = &self.config.reconnect;
        if !reconnect.enabled {
            self.set_state(ConnectionState::Closed);
            return;
        }
        if self.reconnect_attempt >= reconnect.max_attempts {
            tracing::error!(attempts = self.reconnect_attempt, "reconnect attempts exhausted");
            self.last_error = Some(RealtimeError::ReconnectExhausted {
                attempts: self.reconnect_attempt,
            });
            self.set_state(ConnectionState::Error);
            return;
        }

        let delay = reconnect.delay_for_attempt(self.reconnect_attempt);
        tracing::info!(
            attempt = self.reconnect_attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.reconnect_at = Some(now + delay);
        self.set_state(ConnectionState::Closed);
    }

    fn flush_subscriptions(&mut self) {
        for channel in self.subscriptions.pending_unsubscribe() {
            self.deactivate(&channel);
        }
        for channel in self.subscriptions.pending_subscribe() {
            self.activate(&channel);
        }
    }

    fn activate(&mut self, channel: &str) {
        let frame = OutboundMessage::Subscribe {
            channel: channel.to_string(),
        };
        match self.write(&frame) {
            Ok(()) => self.subscriptions.mark_active(channel),
            Err(e) => tracing::warn!(channel, error = %e, "subscribe not sent"),
        }
    }

    fn deactivate(&mut self, channel: &str) {
        let frame = OutboundMessage::Unsubscribe {
            channel: channel.to_string(),
        };
        match self.write(&frame) {
            Ok(()) => self.subscriptions.mark_inactive(channel),
            Err(e) => tracing::warn!(channel, error = %e, "unsubscribe not sent"),
        }
    }

    fn send(&mut self, message: OutboundMessage) -> Result<(), RealtimeError> {
        if !self.state.can_send() {
            tracing::debug!(state = %self.state, kind = message.type_name(), "dropping frame");
            return Err(RealtimeError::NotReady(self.state));
        }
        self.write(&message)
    }

    fn write(&mut self, message: &OutboundMessage) -> Result<(), RealtimeError> {
        let text = message
            .encode()
            .map_err(|e| RealtimeError::Send(e.to_string()))?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(RealtimeError::NotReady(self.state))?;
        transport
            .send_text(text)
            .map_err(|e| RealtimeError::Send(e.to_string()))
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, generation = self.generation, "state change");
            self.state = next;
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}
