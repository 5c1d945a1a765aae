//! Channel subscription registry.
//!
//! Tracks the channels the application wants (`channels`) separately from the
//! channels the server currently knows about on the live connection (`active`).
//! The difference between the two is the deferred flush.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    channels: BTreeSet<String>,
    active: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a channel. Returns false if it was already recorded.
    pub fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    /// Forget a channel. Returns false if it was not recorded.
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn is_active(&self, channel: &str) -> bool {
        self.active.contains(channel)
    }

    pub fn mark_active(&mut self, channel: &str) {
        self.active.insert(channel.to_string());
    }

    pub fn mark_inactive(&mut self, channel: &str) {
        self.active.remove(channel);
    }

    /// The connection went away; nothing is active server-side any more.
    pub fn deactivate_all(&mut self) {
        self.active.clear();
    }

    /// Recorded channels the server has not been told about.
    pub fn pending_subscribe(&self) -> Vec<String> {
        self.channels.difference(&self.active).cloned().collect()
    }

    /// Active channels the application no longer wants.
    pub fn pending_unsubscribe(&self) -> Vec<String> {
        self.active.difference(&self.channels).cloned().collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
