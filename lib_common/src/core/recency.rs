//! # Recency Filter
//!
//! A bounded FIFO window of the most recently forwarded sequential IDs. The
//! ring keeps insertion order for eviction and a hash set mirrors it for O(1)
//! membership tests.
//!
//! The filter is not synchronized. The manager keeps it behind a mutex that is
//! only touched by the receive loop and by a swap holding the coordination
//! lock.

use std::collections::{HashSet, VecDeque};

use crate::core::broadcast::SequentialId;

/// Number of IDs remembered before the oldest one is evicted.
pub const RECENCY_CAPACITY: usize = 2500;

/// Bounded set of recently seen IDs with FIFO eviction.
#[derive(Debug, Clone)]
pub struct RecencyFilter {
    order: VecDeque<SequentialId>,
    members: HashSet<SequentialId>,
    capacity: usize,
}

impl Default for RecencyFilter {
    fn default() -> Self {
        Self::with_capacity(RECENCY_CAPACITY)
    }
}

impl RecencyFilter {
    /// Creates an empty filter holding at most `capacity` IDs.
    ///
    /// A capacity of zero is bumped to one so that an immediate replay of the
    /// last ID is still suppressed.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` if `id` is currently inside the window.
    pub fn seen(&self, id: &SequentialId) -> bool {
        self.members.contains(id)
    }

    /// Inserts `id`, evicting the oldest entry when the window is full.
    ///
    /// Returns `false` (and changes nothing) if `id` was already present.
    pub fn record(&mut self, id: SequentialId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    /// Empties the window without shrinking its allocation.
    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
