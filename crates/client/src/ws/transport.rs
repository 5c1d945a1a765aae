//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] creates one [`Transport`] per connection attempt. Every attempt
//! is tagged with a generation number and reports its lifecycle through
//! [`TransportEvents`], so the manager can discard events from superseded
//! connections.

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::TransportError;

/// Lifecycle and data events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Sending half of the transport event queue.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the receiving side is gone.
    pub fn emit(&self, generation: u64, event: TransportEvent) -> bool {
        self.tx.send((generation, event)).is_ok()
    }
}

/// A single live connection owned by the manager.
pub trait Transport: Send + 'static {
    /// Queue a text frame. Frames are written in call order.
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Factory for transports.
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Start a connection attempt. An `Err` means the transport could not even be
    /// constructed; handshake failures arrive later as events.
    fn open(&mut self, url: &str, generation: u64) -> Result<Self::Transport, TransportError>;
}

enum Command {
    Text(String),
    Close,
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    events: TransportEvents,
}

impl WsConnector {
    pub fn new(events: TransportEvents) -> Self {
        Self { events }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&mut self, url: &str, generation: u64) -> Result<WsTransport, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (tx, rx) = unbounded();
        runtime.spawn(run_socket(
            parsed.to_string(),
            generation,
            rx,
            self.events.clone(),
        ));
        Ok(WsTransport { outbound: tx })
    }
}

/// Handle to a socket task spawned by [`WsConnector`].
///
/// Dropping the handle closes the socket.
pub struct WsTransport {
    outbound: UnboundedSender<Command>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .unbounded_send(Command::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let _ = self.outbound.unbounded_send(Command::Close);
        self.outbound.close_channel();
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    mut outbound: UnboundedReceiver<Command>,
    events: TransportEvents,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(%url, generation, error = %e, "websocket handshake failed");
            events.emit(generation, TransportEvent::Error(e.to_string()));
            events.emit(
                generation,
                TransportEvent::Closed {
                    code: None,
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    tracing::debug!(%url, generation, "websocket open");
    events.emit(generation, TransportEvent::Opened);
    let (mut sink, mut source) = stream.split();

    let (code, reason) = loop {
        tokio::select! {
            command = outbound.next() => match command {
                Some(Command::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        events.emit(generation, TransportEvent::Error(e.to_string()));
                        break (None, e.to_string());
                    }
                }
                // Requested by the manager, which no longer listens to this generation.
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    tracing::debug!(generation, "websocket closed by client");
                    return;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.emit(generation, TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, "closed by server".to_string()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.emit(generation, TransportEvent::Error(e.to_string()));
                    break (None, e.to_string());
                }
                None => break (None, "stream ended".to_string()),
            },
        }
    };

    tracing::debug!(generation, ?code, %reason, "websocket closed");
    events.emit(generation, TransportEvent::Closed { code, reason });
}
