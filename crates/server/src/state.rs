//! Application state shared across request handlers.

use std::sync::Arc;

use crate::auth::{StaticTokens, TokenVerifier};
use crate::channels::ChannelRegistry;
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub channels: ChannelRegistry,
    pub verifier: Arc<dyn TokenVerifier>,
    pub notify_key: Option<String>,
}

impl AppState {
    pub fn new(verifier: Arc<dyn TokenVerifier>, channel_capacity: usize) -> Self {
        Self {
            channels: ChannelRegistry::new(channel_capacity),
            verifier,
            notify_key: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let mut state = Self::new(
            Arc::new(StaticTokens::new(config.tokens.clone())),
            config.channel_capacity,
        );
        state.notify_key = config.notify_key.clone();
        state
    }

    pub fn with_notify_key(mut self, key: impl Into<String>) -> Self {
        self.notify_key = Some(key.into());
        self
    }
}
