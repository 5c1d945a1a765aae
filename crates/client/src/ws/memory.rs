//! In-memory transport for tests and offline use.
//!
//! [`MemoryConnector`] never touches the network: frames written by the manager
//! are recorded on a shared [`MemoryLink`], and the link can inject transport
//! events on behalf of the "server".

use std::sync::Arc;

use contested_shared::OutboundMessage;
use parking_lot::Mutex;

use super::transport::{Connector, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

#[derive(Default)]
struct LinkState {
    opened: Vec<u64>,
    closed: Vec<u64>,
    sent: Vec<(u64, String)>,
    fail_next_open: Option<String>,
}

/// Shared view of everything the memory transports have done.
#[derive(Clone, Default)]
pub struct MemoryLink {
    state: Arc<Mutex<LinkState>>,
    events: Option<TransportEvents>,
}

impl MemoryLink {
    /// Generations opened so far, oldest first.
    pub fn opened(&self) -> Vec<u64> {
        self.state.lock().opened.clone()
    }

    /// Generations closed by the manager.
    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().closed.clone()
    }

    pub fn latest_generation(&self) -> Option<u64> {
        self.state.lock().opened.last().copied()
    }

    /// Raw frames written so far, across all generations.
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Decoded frames written so far. Undecodable frames are skipped.
    pub fn frames(&self) -> Vec<OutboundMessage> {
        self.sent()
            .iter()
            .filter_map(|text| OutboundMessage::decode(text).ok())
            .collect()
    }

    /// Decoded frames, clearing the record.
    pub fn take_frames(&self) -> Vec<OutboundMessage> {
        let sent = std::mem::take(&mut self.state.lock().sent);
        sent.iter()
            .filter_map(|(_, text)| OutboundMessage::decode(text).ok())
            .collect()
    }

    /// Make the next `open` fail synchronously.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_open = Some(reason.into());
    }

    /// Inject an event as if the transport of `generation` produced it.
    ///
    /// Returns false when the link was built without an event queue or the
    /// receiver is gone.
    pub fn emit(&self, generation: u64, event: TransportEvent) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.emit(generation, event))
    }
}

/// Connector producing [`MemoryTransport`]s.
pub struct MemoryConnector {
    link: MemoryLink,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            link: MemoryLink::default(),
        }
    }

    /// Connector whose link can inject events into `events`.
    pub fn with_events(events: TransportEvents) -> Self {
        Self {
            link: MemoryLink {
                state: Arc::default(),
                events: Some(events),
            },
        }
    }

    pub fn link(&self) -> MemoryLink {
        self.link.clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    fn open(&mut self, url: &str, generation: u64) -> Result<MemoryTransport, TransportError> {
        let mut state = self.link.state.lock();
        if let Some(reason) = state.fail_next_open.take() {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason,
            });
        }
        state.opened.push(generation);
        Ok(MemoryTransport {
            generation,
            link: self.link.clone(),
            closed: false,
        })
    }
}

pub struct MemoryTransport {
    generation: u64,
    link: MemoryLink,
    closed: bool,
}

impl Transport for MemoryTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.link.state.lock().sent.push((self.generation, text));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.link.state.lock().closed.push(self.generation);
        }
    }
}
