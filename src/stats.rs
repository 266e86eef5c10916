//! Statistics history tracking for the message router.
//!
//! The router publishes a [`RouterStats`] snapshot after every tick; a sampler
//! pushes those snapshots into a [`StatsHistory`] and aggregates them over
//! time windows.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time view of the router's tables and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Registered addresses (including ones not yet found expired).
    pub recipients: usize,
    /// Registered subscriptions across all message types.
    pub subscriptions: usize,
    /// Registered interceptors across all message types.
    pub interceptors: usize,
    /// Messages waiting for their send time.
    pub delayed_messages: usize,
    /// Total messages picked up from the command queue.
    pub routed_messages: u64,
    /// Total deliveries, inline or handed to a dispatcher.
    pub dispatched_messages: u64,
    /// Total messages claimed by an interceptor.
    pub intercepted_messages: u64,
    /// Timestamp when these statistics were gathered (seconds since UNIX EPOCH).
    pub timestamp: u64,
}

pub(crate) fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Rolling window of [`RouterStats`] snapshots, oldest first.
pub struct StatsHistory {
    pub samples: VecDeque<RouterStats>,
    /// Snapshots older than the newest one by more than this are dropped.
    pub retention_secs: u64,
}

impl StatsHistory {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(retention_secs.min(86_400) as usize),
            retention_secs,
        }
    }

    /// Appends a snapshot and evicts those that fell out of retention.
    pub fn push(&mut self, stats: RouterStats) {
        let horizon = stats.timestamp.saturating_sub(self.retention_secs);
        self.samples.push_back(stats);
        while self.samples.front().is_some_and(|s| s.timestamp < horizon) {
            self.samples.pop_front();
        }
    }

    /// Summarises the snapshots taken in the last `window_secs` seconds,
    /// counting back from the newest one.
    pub fn aggregate(&self, window_secs: u64) -> Option<AggregatedStats> {
        let newest = self.samples.back()?;
        let since = newest.timestamp.saturating_sub(window_secs);

        // timestamps never decrease
        let start = self.samples.partition_point(|s| s.timestamp < since);
        let oldest = self.samples.get(start)?;
        let backlog: Vec<usize> = self
            .samples
            .range(start..)
            .map(|s| s.delayed_messages)
            .collect();

        Some(AggregatedStats {
            avg_delayed: backlog.iter().sum::<usize>() as f64 / backlog.len() as f64,
            max_delayed: backlog.iter().copied().max()?,
            min_delayed: backlog.iter().copied().min()?,
            routed_in_window: newest.routed_messages.saturating_sub(oldest.routed_messages),
            sample_count: backlog.len(),
        })
    }
}

/// Summary of a [`StatsHistory`] window.
#[derive(Debug)]
pub struct AggregatedStats {
    /// Average delayed-queue backlog in the window
    pub avg_delayed: f64,
    /// Maximum delayed-queue backlog in the window
    pub max_delayed: usize,
    /// Minimum delayed-queue backlog in the window
    pub min_delayed: usize,
    /// Messages routed between the first and last sample of the window
    pub routed_in_window: u64,
    /// Number of samples in the window
    pub sample_count: usize,
}
