//! Connection state and reconnect policy.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

/// Connection state of the realtime client.
///
/// The only path to `Authenticated` is
/// `Closed -> Connecting -> Open -> Authenticating -> Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Authenticating,
    Authenticated,
    Error,
}

impl ConnectionState {
    /// Transport is up, whether or not the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::Authenticating | ConnectionState::Authenticated
        )
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }

    /// States in which application messages may be written.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Reconnect after transport-initiated closure
    pub enabled: bool,
    /// Maximum consecutive reconnect attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound on the exponential delay (before jitter)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum random delay added to each attempt
    pub jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 1.5,
            jitter: Duration::from_millis(250),
        }
    }
}

impl ReconnectConfig {
    /// Reconnect disabled: transport loss leaves the connection closed.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Exponential delay for a zero-based attempt number, without jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before a zero-based attempt number, jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
