use std::collections::{HashMap, VecDeque};

use crate::api::{PriorityWeight, QueueEntry, SubKey};

#[derive(Debug)]
struct Lane<T> {
    entries: VecDeque<QueueEntry<T>>,
    boosts: u32,
}

impl<T> Lane<T> {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            boosts: 0,
        }
    }
}

/// Pending entries of one key, partitioned into lanes by sub-key.
///
/// Each lane is a FIFO. Across lanes the head with the smallest
/// `(effective weight, seq)` goes first, so without boosts the whole queue
/// behaves as a single FIFO ordered by insertion sequence. Entries without a
/// sub-key share the default lane, which cannot be boosted. Boosts only order
/// lanes against each other; the key's own rank is never changed by them.
#[derive(Debug)]
pub struct KeyQueue<T> {
    lanes: HashMap<Option<SubKey>, Lane<T>>,
    len: usize,
}

impl<T> Default for KeyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> KeyQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: HashMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an entry to the tail of its sub-key lane.
    ///
    /// Entries are expected to arrive with increasing `seq`.
    pub fn push(&mut self, entry: QueueEntry<T>) {
        let lane = self
            .lanes
            .entry(entry.sub_key.clone())
            .or_insert_with(Lane::new);
        debug_assert!(
            lane.entries.back().is_none_or(|last| last.seq < entry.seq),
            "entries must be pushed in insertion order"
        );
        lane.entries.push_back(entry);
        self.len += 1;
    }

    /// Lane whose head goes next, with that head's sequence.
    fn next_lane(&self, base: PriorityWeight, offset: i64) -> Option<(&Option<SubKey>, u64)> {
        self.lanes
            .iter()
            .filter_map(|(sub_key, lane)| {
                lane.entries
                    .front()
                    .map(|head| ((base.boosted(offset, lane.boosts), head.seq), sub_key))
            })
            .min_by_key(|(rank, _)| *rank)
            .map(|((_, seq), sub_key)| (sub_key, seq))
    }

    /// Rank of the key in cross-key selection: its own weight and the
    /// sequence of the entry `pop_front` would return.
    pub fn head_rank(&self, base: PriorityWeight, offset: i64) -> Option<(PriorityWeight, u64)> {
        self.next_lane(base, offset).map(|(_, seq)| (base, seq))
    }

    /// Removes the most urgent lane head (oldest on ties).
    pub fn pop_front(&mut self, base: PriorityWeight, offset: i64) -> Option<QueueEntry<T>> {
        let lane_key = self.next_lane(base, offset)?.0.clone();

        let lane = self.lanes.get_mut(&lane_key)?;
        let entry = lane.entries.pop_front()?;
        if lane.entries.is_empty() && lane.boosts == 0 {
            self.lanes.remove(&lane_key);
        }
        self.len -= 1;
        Some(entry)
    }

    /// Drains every pending entry, oldest first. Boost state is kept.
    pub fn remove_all(&mut self) -> Vec<QueueEntry<T>> {
        let mut removed = Vec::with_capacity(self.len);
        for lane in self.lanes.values_mut() {
            removed.extend(lane.entries.drain(..));
        }
        self.lanes.retain(|_, lane| lane.boosts > 0);
        self.len = 0;
        removed.sort_by_key(|entry| entry.seq);
        removed
    }

    /// Adds (`on = true`) or reverts (`on = false`) one boost of a sub-key lane.
    ///
    /// Boosts stack: each active boost subtracts the offset once more.
    /// Reverting a lane that has no boost is a no-op.
    pub fn boost(&mut self, sub_key: &SubKey, on: bool) {
        let lane_key = Some(sub_key.clone());
        if on {
            let lane = self.lanes.entry(lane_key).or_insert_with(Lane::new);
            lane.boosts = lane.boosts.saturating_add(1);
            return;
        }

        if let Some(lane) = self.lanes.get_mut(&lane_key) {
            lane.boosts = lane.boosts.saturating_sub(1);
            if lane.boosts == 0 && lane.entries.is_empty() {
                self.lanes.remove(&lane_key);
            }
        }
    }

    pub fn boosts(&self, sub_key: &SubKey) -> u32 {
        self.lanes
            .get(&Some(sub_key.clone()))
            .map(|lane| lane.boosts)
            .unwrap_or(0)
    }

    pub fn boosted_sub_keys(&self) -> Vec<SubKey> {
        let mut keys: Vec<SubKey> = self
            .lanes
            .iter()
            .filter(|(_, lane)| lane.boosts > 0)
            .filter_map(|(sub_key, _)| sub_key.clone())
            .collect();
        keys.sort();
        keys
    }
}
