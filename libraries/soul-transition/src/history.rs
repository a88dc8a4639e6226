//! Playback history tracking
//!
//! Maintains a bounded history of played entries for "previous" while shuffling

use crate::types::EntryId;
use std::collections::VecDeque;

/// Playback history with bounded size
///
/// Ring buffer of entry ids; the oldest entry is discarded when full.
#[derive(Debug, Clone)]
pub struct History {
    /// Most recent at the back
    entries: VecDeque<EntryId>,

    max_size: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Remember `entry`; consecutive repeats are stored once
    pub fn push(&mut self, entry: EntryId) {
        if self.entries.back() == Some(&entry) {
            return;
        }
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn peek(&self) -> Option<EntryId> {
        self.entries.back().copied()
    }

    /// Pop entries until one satisfies `keep`
    ///
    /// Entries rejected on the way are discarded.
    pub fn pop_until(&mut self, mut keep: impl FnMut(EntryId) -> bool) -> Option<EntryId> {
        while let Some(entry) = self.entries.pop_back() {
            if keep(entry) {
                return Some(entry);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(50)
    }
}
