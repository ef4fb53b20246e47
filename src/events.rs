//! Core event bus: bounded fan-out of engine happenings to subscribers.
//!
//! Delivery is best-effort: publishing never blocks the engine, a slow
//! subscriber loses events rather than applying backpressure, and a
//! disconnected subscriber is pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::trace;

use crate::item::{GoalStatus, ItemId};
use crate::revision::ConflictWarning;

/// Something the engine did that outer layers may care about.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A new item entered the store.
    ItemAdded(ItemId),
    /// An item's fields changed in place.
    ItemUpdated(ItemId),
    /// The decay cycle dropped an item from the agenda.
    ItemRemovedFromAgenda(ItemId),
    /// Belief revision hit a confident contradiction.
    ConflictDetected(ConflictWarning),
    /// A goal changed status.
    GoalStatusChanged(ItemId, GoalStatus),
    /// The decay cycle flagged an item for archival.
    ItemFlaggedForArchival(ItemId),
}

/// Fan-out bus for [`CoreEvent`]s.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<CoreEvent>>>,
    dropped: AtomicU64,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber with the given channel capacity and returns
    /// its receiving end.
    pub fn subscribe(&self, capacity: usize) -> Receiver<CoreEvent> {
        let (tx, rx) = bounded(capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Publishes an event to every live subscriber without blocking.
    ///
    /// Full channels count the event as dropped for that subscriber;
    /// disconnected subscribers are removed.
    pub fn publish(&self, event: &CoreEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("event dropped for slow subscriber");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Total events dropped on full subscriber channels.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
