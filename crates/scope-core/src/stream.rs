use std::collections::VecDeque;

use crate::events::Entry;

/// Capacity for per-agent log and raw terminal output streams.
pub const LOG_STREAM_CAPACITY: usize = 1000;
/// Capacity for the activity feed.
pub const ACTIVITY_FEED_CAPACITY: usize = 200;

/// Fixed-capacity, insertion-ordered append log.
///
/// On overflow the oldest entries are dropped (FIFO) so `len() <= capacity()`
/// always holds; relative order of survivors is preserved. Eviction is
/// expected behavior, not a failure mode. Each stream has exactly one owner
/// and one writer, so no locking is involved.
///
/// Indices are not stable across appends: once the stream is full, every
/// append shifts surviving entries toward index 0.
#[derive(Debug, Clone)]
pub struct BoundedStream {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl BoundedStream {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "stream capacity must be positive");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: Entry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Non-mutating filtered view; survivors keep their relative order.
    pub fn filter(&self, predicate: impl Fn(&Entry) -> bool) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
