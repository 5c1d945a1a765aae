//! Server configuration from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Accepted access tokens and the user each one authenticates.
    pub tokens: HashMap<String, String>,
    /// Shared key required on `POST /api/notify`, if set.
    pub notify_key: Option<String>,
    /// Per-channel broadcast buffer.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tokens: HashMap::new(),
            notify_key: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CONTESTED_BIND_ADDR` (default: `0.0.0.0:8080`)
    /// - `CONTESTED_WS_TOKENS`: `token=user_id` pairs separated by commas (default: none)
    /// - `CONTESTED_NOTIFY_KEY` (default: unset, notify is open)
    /// - `CONTESTED_CHANNEL_CAPACITY` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw =
            lookup("CONTESTED_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.trim().parse().map_err(|e: std::net::AddrParseError| ConfigError {
            key: "CONTESTED_BIND_ADDR".to_string(),
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let tokens = match lookup("CONTESTED_WS_TOKENS") {
            Some(raw) => parse_tokens(&raw).map_err(|reason| ConfigError {
                key: "CONTESTED_WS_TOKENS".to_string(),
                value: raw.clone(),
                reason,
            })?,
            None => HashMap::new(),
        };

        let channel_capacity = match lookup("CONTESTED_CHANNEL_CAPACITY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                Ok(_) => {
                    return Err(ConfigError {
                        key: "CONTESTED_CHANNEL_CAPACITY".to_string(),
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Err(e) => {
                    return Err(ConfigError {
                        key: "CONTESTED_CHANNEL_CAPACITY".to_string(),
                        reason: e.to_string(),
                        value: raw,
                    })
                }
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self {
            bind_addr,
            tokens,
            notify_key: lookup("CONTESTED_NOTIFY_KEY").filter(|key| !key.is_empty()),
            channel_capacity,
        })
    }
}

/// Parse `token=user_id,token2=user_id2`.
fn parse_tokens(raw: &str) -> Result<HashMap<String, String>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
                Ok((token.trim().to_string(), user.trim().to_string()))
            }
            _ => Err(format!("expected token=user_id, got {pair:?}")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults() {
        assert_eq!(ServerConfig::from_lookup(lookup(&[])).unwrap(), ServerConfig::default());
    }

    #[test]
    fn tokens_are_parsed() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CONTESTED_WS_TOKENS", "tok-a=42, tok-b=7,"),
            ("CONTESTED_NOTIFY_KEY", "secret"),
            ("CONTESTED_BIND_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.tokens.get("tok-a").map(String::as_str), Some("42"));
        assert_eq!(config.tokens.get("tok-b").map(String::as_str), Some("7"));
        assert_eq!(config.notify_key.as_deref(), Some("secret"));
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[rstest]
    #[case("CONTESTED_WS_TOKENS", "nouser")]
    #[case("CONTESTED_WS_TOKENS", "=42")]
    #[case("CONTESTED_CHANNEL_CAPACITY", "0")]
    #[case("CONTESTED_CHANNEL_CAPACITY", "many")]
    #[case("CONTESTED_BIND_ADDR", "localhost")]
    fn malformed_values_are_rejected(#[case] key: &'static str, #[case] value: &'static str) {
        let err = ServerConfig::from_lookup(move |k: &str| (k == key).then(|| value.to_string()))
            .unwrap_err();
        assert_eq!(err.key, key);
        assert_eq!(err.value, value);
    }
}
