//! Channel registry for pub/sub messaging.
//!
//! Each channel is a broadcast of pre-encoded frames. Channels are created on
//! first use and dropped once nobody listens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

#[derive(Clone)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Arc<str>>>>>,
    capacity: usize,
}

impl ChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Receiver for `channel`, creating it on first use.
    ///
    /// The receiver is taken while the registry guard is held, so a concurrent
    /// [`release`](Self::release) cannot drop the channel out from under it.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Arc<str>> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.subscribe();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send `frame` to every current subscriber. Returns how many received it.
    pub async fn publish(&self, channel: &str, frame: impl Into<Arc<str>>) -> usize {
        let sender = {
            let channels = self.channels.read().await;
            channels.get(channel).cloned()
        };
        match sender {
            Some(sender) => sender.send(frame.into()).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop `channel` if it has no subscribers left.
    pub async fn release(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        if channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(channel);
            tracing::debug!(channel, "channel released");
        }
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}
