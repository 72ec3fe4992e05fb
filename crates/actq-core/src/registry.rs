use std::collections::HashMap;

use tracing::trace;

use crate::api::{Key, KeySnapshot, PriorityWeight, QueueEntry};
use crate::queue::KeyQueue;

#[derive(Debug)]
pub struct KeyState<T> {
    pub(crate) weight: PriorityWeight,
    pub(crate) last_active_weight: PriorityWeight,
    pub(crate) queue: KeyQueue<T>,
    pub(crate) in_flight: usize,
    pub(crate) retained: bool,
}

impl<T> KeyState<T> {
    fn new(weight: PriorityWeight) -> Self {
        Self {
            weight,
            last_active_weight: weight,
            queue: KeyQueue::new(),
            in_flight: 0,
            retained: false,
        }
    }

    pub fn weight(&self) -> PriorityWeight {
        self.weight
    }

    pub fn queue(&self) -> &KeyQueue<T> {
        &self.queue
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn is_collectable(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0 && !self.retained
    }

    fn runnable(&self, per_key_limit: usize) -> bool {
        !self.queue.is_empty() && (per_key_limit == 0 || self.in_flight < per_key_limit)
    }
}

/// Active keys with their weights and queues.
///
/// Selection is a linear scan: the number of concurrently active keys is
/// bounded by open UI entities, so a decrease-key heap buys nothing.
#[derive(Debug)]
pub struct Registry<T> {
    keys: HashMap<Key, KeyState<T>>,
    /// In-flight entries of removed keys, by name. A key registered again
    /// under the same name inherits them.
    orphaned: HashMap<Key, usize>,
    boost_offset: i64,
    per_key_limit: usize,
}

impl<T> Registry<T> {
    pub fn new(boost_offset: i64, per_key_limit: usize) -> Self {
        Self {
            keys: HashMap::new(),
            orphaned: HashMap::new(),
            boost_offset,
            per_key_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&KeyState<T>> {
        self.keys.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &Key) -> Option<&mut KeyState<T>> {
        self.keys.get_mut(key)
    }

    /// Returns the state of `key`, registering it at `weight` if absent.
    /// An existing key keeps its current weight.
    pub(crate) fn ensure(&mut self, key: &Key, weight: PriorityWeight) -> &mut KeyState<T> {
        let orphaned = &mut self.orphaned;
        self.keys.entry(key.clone()).or_insert_with(|| {
            let mut state = KeyState::new(weight);
            state.in_flight = orphaned.remove(key).unwrap_or(0);
            state
        })
    }

    pub fn push(&mut self, entry: QueueEntry<T>, weight: PriorityWeight) {
        let key = entry.key.clone();
        self.ensure(&key, weight).queue.push(entry);
    }

    /// Key whose best pending entry is the most urgent, oldest entry first on
    /// equal weight. Keys at their per-key in-flight limit are skipped.
    pub fn peek_highest_priority_key(&self) -> Option<Key> {
        let selected = self
            .keys
            .iter()
            .filter(|(_, state)| state.runnable(self.per_key_limit))
            .filter_map(|(key, state)| {
                state
                    .queue
                    .head_rank(state.weight, self.boost_offset)
                    .map(|rank| (rank, key))
            })
            .min_by_key(|(rank, _)| *rank);

        if let Some(((weight, seq), key)) = selected {
            trace!(key = %key, %weight, seq, "selected key");
        }
        selected.map(|(_, key)| key.clone())
    }

    /// Pops the next entry of `key` honoring its lane boosts.
    pub(crate) fn pop_entry(&mut self, key: &Key) -> Option<QueueEntry<T>> {
        let offset = self.boost_offset;
        let state = self.keys.get_mut(key)?;
        state.queue.pop_front(state.weight, offset)
    }

    /// Sets the weight of a registered key. Returns `false` for unknown keys.
    pub fn update_weight(&mut self, key: &Key, weight: PriorityWeight) -> bool {
        match self.keys.get_mut(key) {
            Some(state) => {
                state.weight = weight;
                if !weight.is_inactive() {
                    state.last_active_weight = weight;
                    state.retained = false;
                }
                true
            }
            None => false,
        }
    }

    /// Unregisters `key`. Its in-flight entries still count against the
    /// per-key limit of that name until they complete.
    pub fn remove(&mut self, key: &Key) -> Option<KeyState<T>> {
        let state = self.keys.remove(key)?;
        if state.in_flight > 0 {
            *self.orphaned.entry(key.clone()).or_default() += state.in_flight;
        }
        Some(state)
    }

    /// Settles one in-flight entry of `key`, registered or removed.
    /// Returns `true` if the key was garbage-collected.
    pub(crate) fn complete(&mut self, key: &Key) -> bool {
        if let Some(state) = self.keys.get_mut(key) {
            debug_assert!(state.in_flight > 0, "completion without in-flight entry for {key}");
            state.in_flight = state.in_flight.saturating_sub(1);
            return self.collect(key);
        }
        if let Some(count) = self.orphaned.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.orphaned.remove(key);
            }
        }
        false
    }

    /// Drops `key` if it has nothing queued, nothing in flight and was not
    /// retained. Returns `true` if the key was removed.
    pub(crate) fn collect(&mut self, key: &Key) -> bool {
        if self.keys.get(key).is_some_and(KeyState::is_collectable) {
            self.keys.remove(key);
            return true;
        }
        false
    }

    pub fn has_runnable(&self) -> bool {
        self.keys
            .values()
            .any(|state| state.runnable(self.per_key_limit))
    }

    pub fn queued(&self) -> usize {
        self.keys.values().map(|state| state.queue.len()).sum()
    }

    pub fn snapshot(&self, key: &Key) -> Option<KeySnapshot> {
        self.keys.get(key).map(|state| KeySnapshot {
            key: key.clone(),
            weight: state.weight,
            last_active_weight: state.last_active_weight,
            queued: state.queue.len(),
            in_flight: state.in_flight,
            boosted_sub_keys: state.queue.boosted_sub_keys(),
            retained: state.retained,
        })
    }

    /// Snapshots of every key, most urgent first.
    pub fn snapshots(&self) -> Vec<KeySnapshot> {
        let mut all: Vec<KeySnapshot> = self
            .keys
            .keys()
            .filter_map(|key| self.snapshot(key))
            .collect();
        all.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.key.cmp(&b.key)));
        all
    }

    pub(crate) fn drain_all(&mut self) -> Vec<QueueEntry<T>> {
        let mut removed: Vec<QueueEntry<T>> = self
            .keys
            .values_mut()
            .flat_map(|state| state.queue.remove_all())
            .collect();
        self.keys.retain(|_, state| state.in_flight > 0);
        removed.sort_by_key(|entry| entry.seq);
        removed
    }
}
