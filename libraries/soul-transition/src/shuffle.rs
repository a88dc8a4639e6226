//! Shuffle order for the play queue
//!
//! Shuffling never reorders the playlist itself. Instead a permutation of
//! entry ids is kept next to it (Fisher-Yates via `rand`), with the entry
//! that was current when shuffling started at the front.

use crate::types::EntryId;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShuffleOrder {
    order: Vec<EntryId>,
}

impl ShuffleOrder {
    /// Random order over `entries`, starting with `first` when given
    pub fn new(entries: &[EntryId], first: Option<EntryId>) -> Self {
        let mut rest: Vec<EntryId> = entries
            .iter()
            .copied()
            .filter(|id| Some(*id) != first)
            .collect();
        rest.shuffle(&mut thread_rng());

        let mut order = Vec::with_capacity(entries.len());
        order.extend(first.filter(|id| entries.contains(id)));
        order.extend(rest);
        Self { order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn first(&self) -> Option<EntryId> {
        self.order.first().copied()
    }

    /// Entry following `id`, `None` at the end or if `id` is unknown
    pub fn next_after(&self, id: EntryId) -> Option<EntryId> {
        let index = self.order.iter().position(|e| *e == id)?;
        self.order.get(index + 1).copied()
    }

    /// Entry preceding `id`
    pub fn previous_before(&self, id: EntryId) -> Option<EntryId> {
        let index = self.order.iter().position(|e| *e == id)?;
        index.checked_sub(1).and_then(|i| self.order.get(i).copied())
    }

    /// Add `id` at a random slot that is still ahead of `current`
    pub fn insert_ahead_of(&mut self, id: EntryId, current: Option<EntryId>) {
        let start = current
            .and_then(|c| self.order.iter().position(|e| *e == c))
            .map_or(0, |i| i + 1);
        let slot = thread_rng().gen_range(start..=self.order.len());
        self.order.insert(slot, id);
    }

    pub fn remove(&mut self, id: EntryId) {
        self.order.retain(|e| *e != id);
    }

    pub fn as_slice(&self) -> &[EntryId] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<EntryId> {
        (0..n).map(|_| EntryId::next()).collect()
    }

    #[test]
    fn shuffle_is_a_permutation_starting_at_first() {
        let entries = ids(20);
        let order = ShuffleOrder::new(&entries, Some(entries[7]));

        assert_eq!(order.len(), 20);
        assert_eq!(order.first(), Some(entries[7]));
        let unique: HashSet<_> = order.as_slice().iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn walk_visits_every_entry_once() {
        let entries = ids(10);
        let order = ShuffleOrder::new(&entries, Some(entries[0]));

        let mut seen = vec![entries[0]];
        let mut cursor = entries[0];
        while let Some(next) = order.next_after(cursor) {
            seen.push(next);
            cursor = next;
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(order.previous_before(seen[1]), Some(seen[0]));
        assert_eq!(order.previous_before(seen[0]), None);
    }

    #[test]
    fn inserted_entry_lands_ahead() {
        let entries = ids(5);
        let mut order = ShuffleOrder::new(&entries, Some(entries[0]));
        let last = order.as_slice()[4];
        let added = EntryId::next();

        order.insert_ahead_of(added, Some(last));
        assert_eq!(order.next_after(last), Some(added));
    }

    #[test]
    fn removed_entry_is_skipped() {
        let entries = ids(3);
        let mut order = ShuffleOrder::new(&entries, Some(entries[0]));
        let middle = order.as_slice()[1];
        let tail = order.as_slice()[2];

        order.remove(middle);
        assert_eq!(order.next_after(entries[0]), Some(tail));
        assert_eq!(order.next_after(middle), None);
    }

    #[test]
    fn unknown_first_is_ignored() {
        let entries = ids(3);
        let order = ShuffleOrder::new(&entries, Some(EntryId::next()));
        assert_eq!(order.len(), 3);
    }
}
