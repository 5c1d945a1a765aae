//! Property-based tests for subscription bookkeeping.
//!
//! Whatever sequence of subscribe/unsubscribe calls is made, the server must
//! see exactly one subscribe per channel that ends up recorded, and the active
//! set after authentication must match the recorded set.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use contested_client::ws::{
    ConnectionManager, ConnectionState, MemoryConnector, MemoryLink, ReconnectConfig,
    TransportEvent,
};
use contested_client::RealtimeConfig;
use contested_shared::OutboundMessage;
use proptest::prelude::*;

const CHANNELS: [&str; 4] = ["user:42", "room", "lobby", "offers"];

#[derive(Debug, Clone)]
enum Op {
    Subscribe(usize),
    Unsubscribe(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..CHANNELS.len()).prop_map(Op::Subscribe),
        (0..CHANNELS.len()).prop_map(Op::Unsubscribe),
    ]
}

fn manager() -> (ConnectionManager<MemoryConnector>, MemoryLink) {
    let connector = MemoryConnector::new();
    let link = connector.link();
    let config = RealtimeConfig {
        url: "ws://realtime.test/api/ws".to_string(),
        auth_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig::disabled(),
    };
    (ConnectionManager::new(config, connector), link)
}

/// Apply `ops` to the manager and to a plain set model, checking that both
/// agree on whether each call changed anything.
fn apply(
    manager: &mut ConnectionManager<MemoryConnector>,
    ops: &[Op],
    model: &mut BTreeSet<&'static str>,
) {
    for op in ops {
        match *op {
            Op::Subscribe(i) => {
                assert_eq!(manager.subscribe(CHANNELS[i]), model.insert(CHANNELS[i]));
            }
            Op::Unsubscribe(i) => {
                assert_eq!(manager.unsubscribe(CHANNELS[i]), model.remove(CHANNELS[i]));
            }
        }
    }
}

fn authenticate(manager: &mut ConnectionManager<MemoryConnector>, now: Instant) {
    manager.connect();
    let generation = manager.generation();
    manager.handle_transport_event(generation, TransportEvent::Opened, now);
    manager.authenticate("tok123", now).unwrap();
    manager.handle_transport_event(
        generation,
        TransportEvent::Message(r#"{"type":"auth_ack","success":true}"#.to_string()),
        now,
    );
    assert_eq!(manager.state(), ConnectionState::Authenticated);
}

fn subscribes(frames: &[OutboundMessage]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            OutboundMessage::Subscribe { channel } => Some(channel.clone()),
            _ => None,
        })
        .collect()
}

proptest! {
    /// Property: calls made before authentication flush as one subscribe per
    /// recorded channel and nothing else.
    #[test]
    fn deferred_flush_sends_each_recorded_channel_once(
        ops in prop::collection::vec(op_strategy(), 0..40)
    ) {
        let now = Instant::now();
        let (mut manager, link) = manager();
        let mut model = BTreeSet::new();

        apply(&mut manager, &ops, &mut model);
        prop_assert!(link.frames().is_empty());

        authenticate(&mut manager, now);
        let frames = link.take_frames();
        let mut sent = subscribes(&frames);
        sent.sort();
        let expected: Vec<String> = model.iter().map(|c| c.to_string()).collect();
        prop_assert_eq!(sent, expected);
        let any_unsubscribe = frames
            .iter()
            .any(|f| matches!(f, OutboundMessage::Unsubscribe { .. }));
        prop_assert!(!any_unsubscribe);
    }

    /// Property: once authenticated, every change is sent immediately and
    /// duplicates never reach the wire.
    #[test]
    fn live_changes_are_sent_once_per_transition(
        before in prop::collection::vec(op_strategy(), 0..20),
        after in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let now = Instant::now();
        let (mut manager, link) = manager();
        let mut model = BTreeSet::new();

        apply(&mut manager, &before, &mut model);
        authenticate(&mut manager, now);
        link.take_frames();

        let mut live = model.clone();
        apply(&mut manager, &after, &mut model);

        // Replay the frames against the set that was live at authentication.
        for frame in link.take_frames() {
            match frame {
                OutboundMessage::Subscribe { channel } => {
                    let channel = CHANNELS.iter().find(|c| **c == channel).copied().unwrap();
                    prop_assert!(live.insert(channel), "duplicate subscribe for {}", channel);
                }
                OutboundMessage::Unsubscribe { channel } => {
                    prop_assert!(live.remove(channel.as_str()), "unsubscribe for inactive {}", channel);
                }
                other => prop_assert!(false, "unexpected frame {:?}", other),
            }
        }
        prop_assert_eq!(&live, &model);

        let active: BTreeSet<&str> = CHANNELS
            .iter()
            .copied()
            .filter(|c| manager.subscriptions().is_active(c))
            .collect();
        prop_assert_eq!(active, model);
    }
}
