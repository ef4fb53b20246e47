//! The agenda: a concurrency-safe priority queue of items awaiting work.
//!
//! Ordering is by descending priority with FIFO tie-breaking, so equal
//! priorities are served in arrival order. Blocked consumers are served by
//! direct handoff: a push while consumers wait gives the item to the
//! longest-waiting consumer without ever touching the heap, which is what
//! makes delivery exactly-once under contention.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::item::{Item, ItemId};

#[derive(Debug)]
struct Entry {
    priority: f32,
    seq: u64,
    item: Item,
}

#[derive(Debug, Default)]
struct Inner {
    /// Binary max-heap over (priority desc, seq asc).
    heap: Vec<Entry>,
    /// Item id → heap slot, for O(log n) remove and reprioritize.
    pos: HashMap<ItemId, usize>,
    /// Tickets of consumers blocked in `pop`, longest-waiting first.
    waiters: VecDeque<u64>,
    /// Items handed directly to a waiting consumer, keyed by ticket.
    handoff: HashMap<u64, Item>,
    next_seq: u64,
    next_ticket: u64,
}

impl Inner {
    fn ranks_before(a: &Entry, b: &Entry) -> bool {
        match a.priority.total_cmp(&b.priority) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a.seq < b.seq,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos.insert(self.heap[a].item.id, a);
        self.pos.insert(self.heap[b].item.id, b);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if Self::ranks_before(&self.heap[idx], &self.heap[parent]) {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut best = idx;
            if left < self.heap.len() && Self::ranks_before(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < self.heap.len() && Self::ranks_before(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == idx {
                break;
            }
            self.swap(idx, best);
            idx = best;
        }
    }

    fn insert(&mut self, priority: f32, item: Item) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let idx = self.heap.len();
        self.pos.insert(item.id, idx);
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
        self.sift_up(idx);
    }

    fn pop_top(&mut self) -> Option<Item> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let entry = self.heap.pop().unwrap_or_else(|| unreachable!());
        self.pos.remove(&entry.item.id);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(entry.item)
    }

    fn remove_at(&mut self, idx: usize) -> Item {
        let last = self.heap.len() - 1;
        self.swap(idx, last);
        let entry = self.heap.pop().unwrap_or_else(|| unreachable!());
        self.pos.remove(&entry.item.id);
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        entry.item
    }
}

/// Concurrency-safe priority scheduler.
///
/// # Examples
///
/// ```
/// use noema::{Agenda, Item, ItemKind, Atom, AtomKind, AtomMeta, Content};
///
/// let agenda = Agenda::new();
/// let meta = AtomMeta::new(AtomKind::Fact, "s", 0.5).unwrap();
/// let atom = Atom::new(Content::text("x"), Vec::new(), meta);
/// let item = Item::builder().atom(atom.id).kind(ItemKind::Query).build().unwrap();
/// agenda.push(item.clone());
/// assert_eq!(agenda.try_pop().map(|i| i.id), Some(item.id));
/// ```
#[derive(Debug, Default)]
pub struct Agenda {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the queue state. No user code runs under this lock; poison is
    /// recoverable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Pushes an item, or updates it in place if already queued.
    ///
    /// If a consumer is blocked in [`pop`](Self::pop), the item is handed to
    /// the longest-waiting one directly and never enters the heap.
    pub fn push(&self, item: Item) {
        let priority = item.attention.priority;
        let mut inner = self.lock();

        if let Some(&idx) = inner.pos.get(&item.id) {
            inner.heap[idx].priority = priority;
            inner.heap[idx].item = item;
            inner.sift_up(idx);
            inner.sift_down(idx);
            return;
        }

        if let Some(ticket) = inner.waiters.pop_front() {
            trace!(ticket, item = %item.id, "direct handoff to waiter");
            inner.handoff.insert(ticket, item);
            drop(inner);
            self.available.notify_all();
            return;
        }

        inner.insert(priority, item);
    }

    /// Pops the highest-priority item, blocking until one is available.
    pub fn pop(&self) -> Item {
        let mut inner = self.lock();
        if let Some(item) = inner.pop_top() {
            return item;
        }

        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.waiters.push_back(ticket);

        loop {
            if let Some(item) = inner.handoff.remove(&ticket) {
                return item;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Pops the highest-priority item, blocking at most `timeout`.
    ///
    /// Returns `None` on timeout. An item handed off concurrently with the
    /// timeout is still consumed, never lost.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Item> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        if let Some(item) = inner.pop_top() {
            return Some(item);
        }

        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.waiters.push_back(ticket);

        loop {
            if let Some(item) = inner.handoff.remove(&ticket) {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                // Final check under the lock: a push may have delivered to
                // our ticket between the last wakeup and here.
                if let Some(item) = inner.handoff.remove(&ticket) {
                    return Some(item);
                }
                inner.waiters.retain(|&t| t != ticket);
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Pops the highest-priority item without blocking.
    #[must_use]
    pub fn try_pop(&self) -> Option<Item> {
        self.lock().pop_top()
    }

    /// Returns a copy of the highest-priority item without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<Item> {
        let inner = self.lock();
        inner.heap.first().map(|e| e.item.clone())
    }

    /// Removes a queued item by id. Returns false if it was not queued.
    pub fn remove(&self, id: &ItemId) -> bool {
        let mut inner = self.lock();
        match inner.pos.get(id).copied() {
            Some(idx) => {
                inner.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Changes the scheduling priority of a queued item in place.
    ///
    /// Returns false if the item is not currently queued.
    pub fn update_priority(&self, id: &ItemId, priority: f32) -> bool {
        let mut inner = self.lock();
        match inner.pos.get(id).copied() {
            Some(idx) => {
                inner.heap[idx].priority = priority;
                inner.heap[idx].item.attention.priority = priority;
                inner.sift_up(idx);
                inner.sift_down(idx);
                true
            }
            None => false,
        }
    }

    /// Returns true if the item is currently queued.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.lock().pos.contains_key(id)
    }

    /// Number of queued items. Items handed to waiters are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Returns true if no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomKind, AtomMeta};
    use crate::attention::AttentionValue;
    use crate::content::Content;
    use crate::item::ItemKind;
    use std::sync::Arc;

    fn item(priority: f32, label: &str) -> Item {
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.5).unwrap();
        let atom = Atom::new(Content::text(label), Vec::new(), meta);
        Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Query)
            .attention(AttentionValue::clamped(priority, 0.5))
            .label(label)
            .build()
            .unwrap()
    }

    #[test]
    fn pops_in_priority_order() {
        let agenda = Agenda::new();
        agenda.push(item(0.2, "low"));
        agenda.push(item(0.9, "high"));
        agenda.push(item(0.5, "mid"));

        let labels: Vec<_> = (0..3)
            .filter_map(|_| agenda.try_pop())
            .filter_map(|i| i.label)
            .collect();
        assert_eq!(labels, ["high", "mid", "low"]);
        assert!(agenda.is_empty());
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let agenda = Agenda::new();
        for name in ["first", "second", "third"] {
            agenda.push(item(0.5, name));
        }
        let labels: Vec<_> = (0..3)
            .filter_map(|_| agenda.try_pop())
            .filter_map(|i| i.label)
            .collect();
        assert_eq!(labels, ["first", "second", "third"]);
    }

    #[test]
    fn pop_blocks_until_push() {
        let agenda = Arc::new(Agenda::new());
        let consumer = {
            let agenda = Arc::clone(&agenda);
            std::thread::spawn(move || agenda.pop())
        };
        std::thread::sleep(Duration::from_millis(50));
        agenda.push(item(0.5, "late"));
        let got = consumer.join().unwrap();
        assert_eq!(got.label.as_deref(), Some("late"));
        assert!(agenda.is_empty());
    }

    #[test]
    fn concurrent_consumers_each_receive_exactly_one() {
        let agenda = Arc::new(Agenda::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let agenda = Arc::clone(&agenda);
                std::thread::spawn(move || agenda.pop().id)
            })
            .collect();
        std::thread::sleep(Duration::from_millis(50));
        for i in 0..4 {
            agenda.push(item(0.5, &format!("item-{i}")));
        }
        let mut ids: Vec<_> = consumers.into_iter().map(|h| h.join().unwrap()).collect();
        let before = ids.len();
        ids.sort_unstable_by_key(|id| id.to_string());
        ids.dedup();
        assert_eq!(ids.len(), before, "an item was delivered twice");
        assert!(agenda.is_empty());
    }

    #[test]
    fn pop_timeout_returns_none_when_idle() {
        let agenda = Agenda::new();
        let started = Instant::now();
        assert!(agenda.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn repush_updates_priority_in_place() {
        let agenda = Agenda::new();
        let mut it = item(0.2, "x");
        agenda.push(it.clone());
        agenda.push(item(0.5, "y"));

        it.attention.priority = 0.9;
        agenda.push(it);
        assert_eq!(agenda.len(), 2);
        assert_eq!(agenda.try_pop().and_then(|i| i.label).as_deref(), Some("x"));
    }

    #[test]
    fn remove_and_contains() {
        let agenda = Agenda::new();
        let it = item(0.5, "x");
        let id = it.id;
        agenda.push(it);
        assert!(agenda.contains(&id));
        assert!(agenda.remove(&id));
        assert!(!agenda.contains(&id));
        assert!(!agenda.remove(&id));
    }

    #[test]
    fn update_priority_reorders() {
        let agenda = Agenda::new();
        let low = item(0.1, "promoted");
        let id = low.id;
        agenda.push(low);
        agenda.push(item(0.5, "steady"));

        assert!(agenda.update_priority(&id, 0.95));
        assert_eq!(
            agenda.try_pop().and_then(|i| i.label).as_deref(),
            Some("promoted")
        );
        assert!(!agenda.update_priority(&ItemId::new(), 0.5));
    }

    #[test]
    fn peek_does_not_remove() {
        let agenda = Agenda::new();
        agenda.push(item(0.7, "top"));
        assert_eq!(agenda.peek().and_then(|i| i.label).as_deref(), Some("top"));
        assert_eq!(agenda.len(), 1);
    }
}
