//! Messages held back until their send time.

use crate::context::MessageContext;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

/// Heap entry ordered by `(time_sent, sequence)`.
///
/// The sequence breaks ties between messages with the same send time so they
/// come out in the order they were queued.
#[derive(Debug, Clone)]
pub struct DelayedMessage {
    pub context: Arc<MessageContext>,
    pub sequence: u64,
}

impl DelayedMessage {
    fn key(&self) -> (Instant, u64) {
        (self.context.time_sent(), self.sequence)
    }
}

impl PartialEq for DelayedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DelayedMessage {}

impl PartialOrd for DelayedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of future-dated messages.
#[derive(Debug, Default)]
pub struct DelayedQueue {
    heap: BinaryHeap<Reverse<DelayedMessage>>,
    next_sequence: u64,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, context: Arc<MessageContext>) {
        self.next_sequence += 1;
        self.heap.push(Reverse(DelayedMessage {
            context,
            sequence: self.next_sequence,
        }));
    }

    /// Pops the earliest message if its send time is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Arc<MessageContext>> {
        if self.heap.peek()?.0.context.time_sent() > now {
            return None;
        }
        self.heap.pop().map(|Reverse(entry)| entry.context)
    }

    /// Send time of the earliest queued message.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.context.time_sent())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(ty: &str, time: Instant) -> Arc<MessageContext> {
        MessageContext::builder(ty, "x").time_sent(time).build()
    }

    #[test]
    fn test_equal_times_keep_insertion_order() {
        let base = Instant::now();
        let due = base + Duration::from_millis(10);
        let mut queue = DelayedQueue::new();
        queue.push(at("A", due));
        queue.push(at("B", due));

        assert!(queue.pop_due(base).is_none());
        assert_eq!(queue.pop_due(due).expect("A due").message_type().as_str(), "A");
        assert_eq!(queue.pop_due(due).expect("B due").message_type().as_str(), "B");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_earliest_first() {
        let base = Instant::now();
        let mut queue = DelayedQueue::new();
        queue.push(at("late", base + Duration::from_millis(30)));
        queue.push(at("early", base + Duration::from_millis(5)));

        assert_eq!(queue.next_due(), Some(base + Duration::from_millis(5)));
        let now = base + Duration::from_millis(50);
        assert_eq!(queue.pop_due(now).expect("due").message_type().as_str(), "early");
        assert_eq!(queue.pop_due(now).expect("due").message_type().as_str(), "late");
        assert_eq!(queue.next_due(), None);
    }
}
