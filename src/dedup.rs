//! Duplicate suppression for redelivered messages
//!
//! If an acknowledgement is lost after a successful send, the queue hands the same id back on
//! the next poll. The guard remembers delivered ids for a retention window so they are never
//! sent twice.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A remembered delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub id: String,
    pub acknowledged_at: Instant,
}

/// Insertion-ordered, time-windowed set of delivered ids, capped at `max_entries`.
#[derive(Debug)]
pub struct DedupGuard {
    retention: Duration,
    max_entries: usize,
    order: VecDeque<DedupEntry>,
    /// id -> acknowledged_at of its live entry in `order`
    index: HashMap<String, Instant>,
}

impl DedupGuard {
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            retention,
            max_entries: max_entries.max(1),
            order: VecDeque::new(),
            index: HashMap::new(),
        }
    }

    /// Has `id` been delivered within the retention window?
    pub fn seen(&mut self, id: &str) -> bool {
        self.seen_at(id, Instant::now())
    }

    pub fn seen_at(&mut self, id: &str, now: Instant) -> bool {
        self.evict_expired(now);
        self.index.contains_key(id)
    }

    /// Record `id` as delivered now
    pub fn remember(&mut self, id: &str) {
        self.remember_at(id, Instant::now());
    }

    pub fn remember_at(&mut self, id: &str, now: Instant) {
        self.evict_expired(now);

        // Re-remembering restarts the window; the stale queue entry is dropped lazily
        self.index.insert(id.to_string(), now);
        self.order.push_back(DedupEntry {
            id: id.to_string(),
            acknowledged_at: now,
        });

        while self.index.len() > self.max_entries {
            if !self.pop_oldest() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            if now.saturating_duration_since(front.acknowledged_at) < self.retention {
                break;
            }
            self.pop_oldest();
        }
    }

    /// Drop the oldest queue entry, removing its id unless it was re-remembered since.
    fn pop_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some(entry) => {
                if self.index.get(&entry.id) == Some(&entry.acknowledged_at) {
                    self.index.remove(&entry.id);
                }
                true
            }
            None => false,
        }
    }
}
