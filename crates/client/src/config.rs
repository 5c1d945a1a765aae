//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use contested_shared::USER_CHANNEL_PREFIX;

use crate::error::ConfigError;
use crate::ws::ReconnectConfig;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/api/ws";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub url: String,
    /// How long to wait for `auth_ack` before reverting to `open`.
    pub auth_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CONTESTED_WS_URL` (default: `ws://localhost:8080/api/ws`)
    /// - `CONTESTED_WS_AUTH_TIMEOUT_MS` (default: 10000)
    /// - `CONTESTED_WS_RECONNECT`: "true" | "false" (default: "true")
    /// - `CONTESTED_WS_MAX_RECONNECT_ATTEMPTS` (default: 10)
    /// - `CONTESTED_WS_RECONNECT_INITIAL_MS` (default: 1000)
    /// - `CONTESTED_WS_RECONNECT_MAX_MS` (default: 30000)
    /// - `CONTESTED_WS_RECONNECT_MULTIPLIER` (default: 1.5)
    /// - `CONTESTED_WS_RECONNECT_JITTER_MS` (default: 250)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            enabled: parse_or(&lookup, "CONTESTED_WS_RECONNECT", defaults.enabled)?,
            max_attempts: parse_or(
                &lookup,
                "CONTESTED_WS_MAX_RECONNECT_ATTEMPTS",
                defaults.max_attempts,
            )?,
            initial_delay: millis_or(
                &lookup,
                "CONTESTED_WS_RECONNECT_INITIAL_MS",
                defaults.initial_delay,
            )?,
            max_delay: millis_or(&lookup, "CONTESTED_WS_RECONNECT_MAX_MS", defaults.max_delay)?,
            multiplier: parse_or(
                &lookup,
                "CONTESTED_WS_RECONNECT_MULTIPLIER",
                defaults.multiplier,
            )?,
            jitter: millis_or(&lookup, "CONTESTED_WS_RECONNECT_JITTER_MS", defaults.jitter)?,
        };
        if reconnect.multiplier < 1.0 {
            return Err(ConfigError {
                key: "CONTESTED_WS_RECONNECT_MULTIPLIER".to_string(),
                value: reconnect.multiplier.to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }

        Ok(Self {
            url: lookup("CONTESTED_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            auth_timeout: millis_or(&lookup, "CONTESTED_WS_AUTH_TIMEOUT_MS", DEFAULT_AUTH_TIMEOUT)?,
            reconnect,
        })
    }
}

/// Provider settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Prefix of the per-user channel subscribed on login.
    pub user_channel_prefix: String,
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_skew: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            user_channel_prefix: USER_CHANNEL_PREFIX.to_string(),
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }
}

impl ProviderConfig {
    /// Environment variables:
    /// - `CONTESTED_USER_CHANNEL_PREFIX` (default: `user:`)
    /// - `CONTESTED_TOKEN_REFRESH_SKEW_SECS` (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let skew_secs: u64 = parse_or(
            &lookup,
            "CONTESTED_TOKEN_REFRESH_SKEW_SECS",
            defaults.refresh_skew.as_secs(),
        )?;
        Ok(Self {
            user_channel_prefix: lookup("CONTESTED_USER_CHANNEL_PREFIX")
                .unwrap_or(defaults.user_channel_prefix),
            refresh_skew: Duration::from_secs(skew_secs),
        })
    }

    pub fn user_channel(&self, user_id: &str) -> String {
        format!("{}{}", self.user_channel_prefix, user_id)
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}
