//! In-process typed event bus with slow-subscriber isolation.
//!
//! Every subscriber gets its own bounded channel. A publish never
//! blocks: when one subscriber's buffer is full, that subscriber's
//! event is dropped (with a warning) while everyone else still
//! receives it. Dropped subscribers get no catch-up. A receiver going
//! away unsubscribes lazily on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use co_domain::event::BusEvent;

/// Per-subscriber channel capacity.
const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<BusEvent>,
}

pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, tx });
        rx
    }

    /// Non-blocking fan-out to every subscriber.
    pub fn publish(&self, event: BusEvent) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.lock();
            for sub in subscribers.iter() {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            subscriber = sub.id,
                            "event bus subscriber is slow, dropping event for it"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(sub.id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.subscribers
                .lock()
                .retain(|s| !closed.contains(&s.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use co_domain::event::EventOp;

    fn history_event(n: u64) -> BusEvent {
        BusEvent::History {
            op: EventOp::Updated,
            session_id: format!("s{n}"),
        }
    }

    #[tokio::test]
    async fn all_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for n in 0..5 {
            bus.publish(history_event(n));
        }
        for rx in [&mut rx1, &mut rx2] {
            for n in 0..5 {
                let event = rx.recv().await.unwrap();
                assert_eq!(event.session_id(), Some(format!("s{n}").as_str()));
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _slow = bus.subscribe(); // never drained
        let mut fast = bus.subscribe();

        // Overflow the slow subscriber's buffer.
        for n in 0..(SUBSCRIBER_BUFFER as u64 + 20) {
            bus.publish(history_event(n));
        }

        // The fast subscriber still got its (bounded) share, in order,
        // starting from the first event.
        let first = fast.recv().await.unwrap();
        assert_eq!(first.session_id(), Some("s0"));
    }

    #[tokio::test]
    async fn overflowed_subscriber_receives_later_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for n in 0..(SUBSCRIBER_BUFFER as u64 + 5) {
            bus.publish(history_event(n));
        }
        // Drain what survived the overflow.
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = event.session_id().map(str::to_owned);
        }
        assert_eq!(last.as_deref(), Some(format!("s{}", SUBSCRIBER_BUFFER as u64 - 1).as_str()));

        // New events still arrive (no catch-up, but no cut-off either).
        bus.publish(history_event(999));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), Some("s999"));
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _keep = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.publish(history_event(0));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
