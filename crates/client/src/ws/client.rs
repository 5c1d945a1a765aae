//! Async driver around [`ConnectionManager`].
//!
//! A [`RealtimeClient`] is a cheap, cloneable handle. All handles share one
//! manager; a background task feeds it transport events and fires its timers.
//! Every change is published as a [`ConnectionSnapshot`] on a watch channel, and
//! inbound messages are fanned out to listeners after the manager lock is
//! released, so listeners may call back into the client.

use std::sync::{Arc, Weak};
use std::time::Instant;

use contested_shared::InboundMessage;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use super::connection::ConnectionState;
use super::hooks::ConnectionSnapshot;
use super::listeners::{ListenerFilter, ListenerId, Listeners};
use super::manager::ConnectionManager;
use super::transport::{Connector, TransportEvent, TransportEvents, WsConnector};
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;

/// Current time on the tokio clock, so paused-time tests drive the timers too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

struct Shared<C: Connector> {
    manager: Mutex<ConnectionManager<C>>,
    listeners: Arc<Mutex<Listeners>>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    /// Wakes the driver so it re-reads the next deadline.
    wake: Arc<Notify>,
    /// Dropped with the last handle, which stops the driver.
    _shutdown: oneshot::Sender<()>,
}

impl<C: Connector> Shared<C> {
    fn with_manager<R>(&self, f: impl FnOnce(&mut ConnectionManager<C>) -> R) -> R {
        let mut manager = self.manager.lock();
        let result = f(&mut manager);
        let next = manager.snapshot();
        // Published under the lock so snapshots are never observed out of order.
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        drop(manager);
        self.wake.notify_one();
        result
    }

    fn dispatch(&self, message: &InboundMessage) {
        let callbacks = self.listeners.lock().matching(message);
        for callback in callbacks {
            callback(message);
        }
    }
}

/// Handle to the shared realtime connection.
pub struct RealtimeClient<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for RealtimeClient<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl RealtimeClient<WsConnector> {
    /// Client over real WebSockets.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_connector(config, WsConnector::new)
    }
}

impl<C: Connector> RealtimeClient<C> {
    /// Client over a custom connector. `make` receives the event queue the
    /// connector's transports must report to.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_connector(
        config: RealtimeConfig,
        make: impl FnOnce(TransportEvents) -> C,
    ) -> Self {
        let (events, events_rx) = TransportEvents::channel();
        let manager = ConnectionManager::new(config, make(events));
        let (snapshot, _) = watch::channel(manager.snapshot());
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            manager: Mutex::new(manager),
            listeners: Arc::new(Mutex::new(Listeners::new())),
            snapshot,
            wake: Arc::clone(&wake),
            _shutdown: shutdown_tx,
        });
        tokio::spawn(drive(Arc::downgrade(&shared), events_rx, wake, shutdown_rx));

        Self { shared }
    }

    pub fn connect(&self) {
        self.shared.with_manager(|manager| manager.connect());
    }

    pub fn disconnect(&self) {
        self.shared.with_manager(|manager| manager.disconnect());
    }

    pub fn authenticate(&self, token: &str) -> Result<(), RealtimeError> {
        self.shared
            .with_manager(|manager| manager.authenticate(token, now()))
    }

    /// Returns false if the channel was already recorded.
    pub fn subscribe(&self, channel: &str) -> bool {
        self.shared.with_manager(|manager| manager.subscribe(channel))
    }

    /// Returns false if the channel was not recorded.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.shared
            .with_manager(|manager| manager.unsubscribe(channel))
    }

    pub fn send_message(&self, channel: &str, content: Value) -> Result<(), RealtimeError> {
        self.shared
            .with_manager(|manager| manager.send_message(channel, content))
    }

    pub fn ping(&self) -> Result<(), RealtimeError> {
        self.shared.with_manager(|manager| manager.ping())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Register a listener for inbound messages matching `filter`.
    pub fn on_message(
        &self,
        filter: ListenerFilter,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.lock().add(filter, Arc::new(callback))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.lock().remove(id)
    }

    /// Number of registered listeners, including those behind live
    /// [`MessageStream`]s.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Inbound messages matching `filter` as a channel. The listener is
    /// removed when the returned stream is dropped.
    pub fn messages(&self, filter: ListenerFilter) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on_message(filter, move |message| {
            let _ = tx.send(message.clone());
        });
        MessageStream {
            rx,
            id,
            listeners: Arc::downgrade(&self.shared.listeners),
        }
    }
}

/// Receiving end of [`RealtimeClient::messages`].
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    id: ListenerId,
    listeners: Weak<Mutex<Listeners>>,
}

impl MessageStream {
    /// Next matching message, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<InboundMessage, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(self.id);
        }
    }
}

async fn drive<C: Connector>(
    shared: Weak<Shared<C>>,
    mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    wake: Arc<Notify>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let deadline = match shared.upgrade() {
            Some(shared) => shared.manager.lock().next_deadline(),
            None => break,
        };
        let timer = async move {
            match deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            () = wake.notified() => {}
            received = events.recv() => {
                let Some((generation, event)) = received else { break };
                let Some(shared) = shared.upgrade() else { break };
                let message = shared.with_manager(|manager| {
                    manager.handle_transport_event(generation, event, now())
                });
                if let Some(message) = message {
                    shared.dispatch(&message);
                }
            }
            () = timer => {
                let Some(shared) = shared.upgrade() else { break };
                shared.with_manager(|manager| manager.poll_timers(now()));
            }
        }
    }
    tracing::debug!("realtime driver stopped");
}
