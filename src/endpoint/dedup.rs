//! Duplicate detection for reliable inbound messages.
//!
//! Remembers the ids of recently received reliable messages so a
//! retransmission of something already accepted is dropped instead of being
//! delivered twice. Entries are evicted by age with
//! [`ReceivedMessageCache::purge`].

use super::message::MessageId;
use ahash::AHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ReceivedMessageCache {
    /// Last time each message id was seen.
    seen: AHashMap<MessageId, Instant>,
}

impl ReceivedMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as seen at `now`.
    ///
    /// # Returns
    ///
    /// `true` if the id was already known (a duplicate), `false` otherwise.
    pub fn check_and_insert(&mut self, id: MessageId, now: Instant) -> bool {
        self.seen.insert(id, now).is_some()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    /// Evicts entries last seen more than `max_age` before `now`. Returns the
    /// number of evicted entries.
    pub fn purge(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= max_age);
        before - self.seen.len()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
