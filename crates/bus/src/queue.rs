//! Round/step-indexed deferral buffer for early events.

use std::collections::BTreeMap;

/// Buffers events that arrived before their `(round, step)` became current.
///
/// Owned by whoever classifies events (the coordinator); not itself
/// synchronized.
#[derive(Debug)]
pub struct EventQueue<E> {
    entries: BTreeMap<u64, BTreeMap<u8, Vec<E>>>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer an event for `(round, step)`.
    pub fn put(&mut self, round: u64, step: u8, ev: E) {
        self.entries
            .entry(round)
            .or_default()
            .entry(step)
            .or_default()
            .push(ev);
    }

    /// Drain the events stored for exactly `(round, step)`, in insertion
    /// order.
    pub fn drain(&mut self, round: u64, step: u8) -> Vec<E> {
        self.entries
            .get_mut(&round)
            .and_then(|steps| steps.remove(&step))
            .unwrap_or_default()
    }

    /// Drop every entry with a round strictly below `round`.
    pub fn consume_until(&mut self, round: u64) {
        self.entries = self.entries.split_off(&round);
    }

    /// Drain the lowest buffered step at `round`, returning the events and
    /// which step they belong to.
    pub fn consume_next_step(&mut self, round: u64) -> Option<(Vec<E>, u8)> {
        let steps = self.entries.get_mut(&round)?;
        let step = *steps.keys().next()?;
        let events = steps.remove(&step)?;
        Some((events, step))
    }

    /// Drop every entry at `round`.
    pub fn clear(&mut self, round: u64) {
        self.entries.remove(&round);
    }

    /// Number of buffered events across all rounds.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|steps| steps.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
