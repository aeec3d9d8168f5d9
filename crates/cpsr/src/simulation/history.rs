use std::collections::BTreeMap;
use std::ops::Bound;

use crate::input::InputSnapshot;

/// Causal position of an input: one per live client tick.
pub type TickId = u32;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Single-writer source of monotonically increasing tick ids.
#[derive(Debug, Clone, Default)]
pub struct TickIdSource {
    next: TickId,
}

impl TickIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> TickId {
        self.next
    }

    pub fn next_id(&mut self) -> TickId {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// Tick-indexed log of recorded inputs, bounded by a retention capacity.
///
/// Entries are immutable once recorded. Iteration is always in ascending id
/// order regardless of insertion order.
#[derive(Debug, Clone)]
pub struct InputHistory {
    entries: BTreeMap<TickId, InputSnapshot>,
    capacity: usize,
    pruned_through: Option<TickId>,
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
            pruned_through: None,
        }
    }

    /// Returns false when the id already has an entry or was pruned.
    pub fn record(&mut self, id: TickId, input: InputSnapshot) -> bool {
        if self.pruned_through.is_some_and(|pruned| id <= pruned) {
            return false;
        }
        if self.entries.contains_key(&id) {
            return false;
        }

        self.entries.insert(id, input);

        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.pop_first() {
                self.mark_pruned(evicted);
            }
        }

        true
    }

    pub fn get(&self, id: TickId) -> Option<InputSnapshot> {
        self.entries.get(&id).copied()
    }

    /// Entries with id strictly greater than `id`, ascending.
    pub fn range_after(&self, id: TickId) -> impl Iterator<Item = (TickId, InputSnapshot)> + '_ {
        self.entries
            .range((Bound::Excluded(id), Bound::Unbounded))
            .map(|(id, input)| (*id, *input))
    }

    /// Drops every entry with id `<= id`.
    pub fn prune_through(&mut self, id: TickId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry, _| *entry > id);
        let removed = before - self.entries.len();

        if removed > 0 {
            self.mark_pruned(id);
        }
        removed
    }

    fn mark_pruned(&mut self, id: TickId) {
        self.pruned_through = Some(self.pruned_through.map_or(id, |p| p.max(id)));
    }

    /// Highest id ever evicted or pruned.
    pub fn pruned_through(&self) -> Option<TickId> {
        self.pruned_through
    }

    pub fn oldest(&self) -> Option<TickId> {
        self.entries.keys().next().copied()
    }

    pub fn newest(&self) -> Option<TickId> {
        self.entries.keys().next_back().copied()
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn right() -> InputSnapshot {
        InputSnapshot::new(false, false, false, true)
    }

    #[test]
    fn tick_ids_increase_by_one() {
        let mut ids = TickIdSource::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.peek(), 2);
    }

    #[test]
    fn entries_are_immutable() {
        let mut history = InputHistory::new(16);
        assert!(history.record(3, right()));
        assert!(!history.record(3, InputSnapshot::IDLE));
        assert_eq!(history.get(3), Some(right()));
    }

    #[test]
    fn range_after_is_ascending_for_out_of_order_inserts() {
        let mut history = InputHistory::new(16);
        for id in [7, 2, 5, 3, 6] {
            history.record(id, right());
        }

        let ids: Vec<TickId> = history.range_after(3).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut history = InputHistory::new(4);
        for id in 0..6 {
            history.record(id, right());
        }

        assert_eq!(history.len(), 4);
        assert_eq!(history.oldest(), Some(2));
        assert_eq!(history.pruned_through(), Some(1));
        assert!(!history.record(1, right()));
    }

    #[test]
    fn prune_through_removes_acknowledged_entries() {
        let mut history = InputHistory::new(16);
        for id in 0..10 {
            history.record(id, right());
        }

        assert_eq!(history.prune_through(4), 5);
        assert_eq!(history.oldest(), Some(5));
        assert_eq!(history.newest(), Some(9));
        assert_eq!(history.pruned_through(), Some(4));
        assert_eq!(history.prune_through(2), 0);
    }
}
