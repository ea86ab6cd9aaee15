use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::events::domain::identity_event::{EventPublisher, IdentityEvent};

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_MAX_CONSECUTIVE_DROPS: u32 = 16;

struct Subscriber {
    id: u64,
    tx: Sender<IdentityEvent>,
    consecutive_drops: u32,
}

/// Best-effort fan-out of identity events.
///
/// Every subscriber owns a bounded queue fed with `try_send`. A full queue
/// loses the event for that subscriber only; a subscriber that stays full
/// for `max_consecutive_drops` publishes in a row is disconnected. Dropped
/// [`Subscription`]s are pruned on the next publish.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    max_consecutive_drops: u32,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize, max_consecutive_drops: u32) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            max_consecutive_drops: max_consecutive_drops.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber {
            id,
            tx,
            consecutive_drops: 0,
        });
        log::debug!("Event subscriber {id} connected");
        Subscription { id, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `event` to every connected subscriber without blocking.
    /// Returns how many subscribers received it.
    pub fn broadcast(&self, event: &IdentityEvent) -> usize {
        let max_drops = self.max_consecutive_drops;
        let mut delivered = 0;
        self.lock().retain_mut(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                sub.consecutive_drops = 0;
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                sub.consecutive_drops += 1;
                if sub.consecutive_drops >= max_drops {
                    log::warn!(
                        "Disconnecting event subscriber {} after {} dropped events",
                        sub.id,
                        sub.consecutive_drops
                    );
                    false
                } else {
                    true
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Event subscriber {} left", sub.id);
                false
            }
        });
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_CONSECUTIVE_DROPS)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: IdentityEvent) {
        self.broadcast(&event);
    }
}

/// Receiving end of one subscriber's queue. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<IdentityEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<IdentityEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout`. `Err(true)` means the bus disconnected this
    /// subscriber and no events remain.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<IdentityEvent, bool> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => false,
            RecvTimeoutError::Disconnected => true,
        })
    }

    /// Drains whatever is queued right now.
    pub fn drain(&self) -> Vec<IdentityEvent> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::domain::embedding::EmbeddingVector;
    use crate::events::domain::identity_event::EventKind;
    use crate::identity::domain::identity::{Identity, IdentityId};
    use crate::shared::category::Category;

    fn event(id: u64) -> IdentityEvent {
        let identity = Identity::new(
            IdentityId(id),
            format!("cow{id}"),
            Category::Animal,
            EmbeddingVector::from_raw(vec![1.0]).unwrap(),
            0,
        );
        IdentityEvent::for_identity(EventKind::Registered, &identity, None, None, None, id)
    }

    #[test]
    fn test_delivers_to_subscribers_connected_at_publish_time() {
        let bus = EventBus::new(8, 4);
        let early = bus.subscribe();
        bus.publish(event(1));
        let late = bus.subscribe();
        bus.publish(event(2));

        let early_ids: Vec<u64> = early.drain().iter().map(|e| e.entity_id.0).collect();
        let late_ids: Vec<u64> = late.drain().iter().map(|e| e.entity_id.0).collect();
        assert_eq!(early_ids, vec![1, 2]);
        assert_eq!(late_ids, vec![2]);
    }

    #[test]
    fn test_departed_subscribers_are_pruned() {
        let bus = EventBus::new(8, 4);
        let stays = bus.subscribe();
        let leaves = bus.subscribe();
        drop(leaves);

        assert_eq!(bus.broadcast(&event(1)), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(stays.drain().len(), 1);
    }

    #[test]
    fn test_slow_subscriber_is_dropped_without_blocking() {
        let bus = EventBus::new(2, 3);
        let idle = bus.subscribe();
        let active = bus.subscribe();

        for i in 0..10 {
            bus.publish(event(i));
            assert_eq!(active.drain().len(), 1);
        }

        // Two queued, three dropped, then disconnected.
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(idle.drain().len(), 2);
        assert_eq!(idle.recv_timeout(Duration::from_millis(10)), Err(true));
    }

    #[test]
    fn test_drop_counter_resets_after_delivery() {
        let bus = EventBus::new(1, 2);
        let sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(event(i));
            bus.publish(event(100 + i));
            assert!(sub.try_recv().is_some());
        }
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.broadcast(&event(1)), 0);
    }
}
