//! Listener registry for inbound message fan-out.

use std::sync::Arc;

use contested_shared::InboundMessage;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Which inbound messages a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerFilter {
    All,
    /// Messages whose `type` equals the given string.
    Type(String),
    /// Messages whose `channel` field equals the given channel.
    Channel(String),
}

impl ListenerFilter {
    pub fn matches(&self, message: &InboundMessage) -> bool {
        match self {
            ListenerFilter::All => true,
            ListenerFilter::Type(message_type) => message.message_type == *message_type,
            ListenerFilter::Channel(channel) => message.channel() == Some(channel.as_str()),
        }
    }
}

pub type ListenerFn = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

struct Entry {
    id: ListenerId,
    filter: ListenerFilter,
    callback: ListenerFn,
}

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: ListenerFilter, callback: ListenerFn) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Entry {
            id,
            filter,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Callbacks interested in `message`, in registration order.
    ///
    /// Returned as owned handles so they can be invoked after the registry lock
    /// is released.
    pub fn matching(&self, message: &InboundMessage) -> Vec<ListenerFn> {
        self.entries
            .iter()
            .filter(|entry| entry.filter.matches(message))
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }

    /// Invoke every matching listener; returns how many were called.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let callbacks = self.matching(message);
        for callback in &callbacks {
            callback(message);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rstest::rstest;

    use super::*;

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage::decode(text).unwrap()
    }

    #[rstest]
    #[case(ListenerFilter::All, true)]
    #[case(ListenerFilter::Type("notification".into()), true)]
    #[case(ListenerFilter::Type("message".into()), false)]
    #[case(ListenerFilter::Channel("user:42".into()), true)]
    #[case(ListenerFilter::Channel("user:7".into()), false)]
    fn filter_matching(#[case] filter: ListenerFilter, #[case] expected: bool) {
        let message = inbound(r#"{"type":"notification","channel":"user:42"}"#);
        assert_eq!(filter.matches(&message), expected);
    }

    #[test]
    fn dispatch_fans_out_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::new();
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            listeners.add(
                ListenerFilter::All,
                Arc::new(move |message: &InboundMessage| {
                    seen.lock().push(format!("{name}:{}", message.message_type));
                }),
            );
        }
        listeners.add(
            ListenerFilter::Type("notification".into()),
            Arc::new(|_: &InboundMessage| panic!("filtered listener must not run")),
        );

        assert_eq!(listeners.dispatch(&inbound(r#"{"type":"pong"}"#)), 2);
        assert_eq!(*seen.lock(), vec!["first:pong", "second:pong"]);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let mut listeners = Listeners::new();
        let id = listeners.add(ListenerFilter::All, Arc::new(|_: &InboundMessage| {}));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert_eq!(listeners.dispatch(&inbound(r#"{"type":"pong"}"#)), 0);
    }
}
