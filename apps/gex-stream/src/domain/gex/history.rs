//! Bounded snapshot time series.

use std::collections::VecDeque;

use super::snapshot::GexSnapshot;

/// Default number of snapshots retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 720;

/// FIFO history of captured snapshots; the oldest entry is evicted once full.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    entries: VecDeque<GexSnapshot>,
}

impl SnapshotHistory {
    /// Create an empty history holding at most `capacity` snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, evicting the oldest if over capacity.
    pub fn push(&mut self, snapshot: GexSnapshot) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained snapshots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&GexSnapshot> {
        self.entries.back()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &GexSnapshot> {
        self.entries.iter()
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
