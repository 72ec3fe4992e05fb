use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identifier grouping operations that must keep their relative order.
///
/// Cloning is cheap: the name is shared behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secondary dimension inside a key (for example a column of a table).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubKey(Arc<str>);

impl SubKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for SubKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduling urgency of a key. Lower value = more urgent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityWeight(i64);

impl PriorityWeight {
    /// Sentinel that is less urgent than every regular weight.
    pub const INACTIVE: PriorityWeight = PriorityWeight(i64::MAX);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn is_inactive(self) -> bool {
        self == Self::INACTIVE
    }

    /// Weight after applying `boosts` sub-key boosts of `offset` each.
    pub fn boosted(self, offset: i64, boosts: u32) -> Self {
        let bias = offset.saturating_mul(i64::from(boosts));
        Self(self.0.saturating_sub(bias))
    }
}

impl From<i64> for PriorityWeight {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PriorityWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inactive() {
            f.write_str("inactive")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Named priority levels.
///
/// Levels are spaced by 10 so callers can slot custom weights between them.
/// A sub-key boost only reorders lanes inside one key and never changes
/// where the key sits among these levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
    Inactive,
}

impl Priority {
    pub fn weight(self) -> PriorityWeight {
        match self {
            Priority::Highest => PriorityWeight(0),
            Priority::High => PriorityWeight(10),
            Priority::Medium => PriorityWeight(20),
            Priority::Low => PriorityWeight(30),
            Priority::Lowest => PriorityWeight(40),
            Priority::Inactive => PriorityWeight::INACTIVE,
        }
    }

    pub fn ordered() -> [Priority; 6] {
        [
            Priority::Highest,
            Priority::High,
            Priority::Medium,
            Priority::Low,
            Priority::Lowest,
            Priority::Inactive,
        ]
    }
}

impl From<Priority> for PriorityWeight {
    fn from(value: Priority) -> Self {
        value.weight()
    }
}

/// One scheduled operation.
///
/// - `seq` is the scheduler-wide insertion sequence; lower means older.
/// - `enqueued_at` is used to measure queue time when the entry is dispatched.
#[derive(Debug)]
pub struct QueueEntry<T> {
    pub key: Key,
    pub sub_key: Option<SubKey>,
    pub operation: String,
    pub payload: T,
    pub seq: u64,
    pub enqueued_at: Instant,
}

#[derive(Debug)]
pub enum EnqueueResult<T> {
    /// Entry accepted with the given insertion sequence.
    Enqueued { seq: u64 },
    /// The scheduler is closed; the payload is handed back untouched.
    Closed(T),
}

/// Proof that an entry was handed out and has not completed yet.
///
/// Must be given back through [`Scheduler::complete`](crate::Scheduler::complete)
/// exactly once, otherwise the concurrency slot it holds is never released.
#[derive(Debug)]
#[must_use = "an in-flight ticket holds a concurrency slot until completed"]
pub struct InFlightTicket {
    pub(crate) key: Key,
    pub(crate) seq: u64,
    pub(crate) dispatched_at: Instant,
}

impl InFlightTicket {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }
}

/// An entry selected for execution together with its in-flight ticket.
#[derive(Debug)]
pub struct Dispatch<T> {
    pub entry: QueueEntry<T>,
    pub ticket: InFlightTicket,
}

#[derive(Debug)]
pub enum DequeueResult<T> {
    /// Entry of the most urgent runnable key.
    Dispatched(Dispatch<T>),
    /// Every concurrency slot is taken.
    Saturated,
    /// No runnable work.
    Empty,
    /// The scheduler was closed and will not hand out more work.
    Closed,
}

/// How an in-flight entry finished.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    /// The execution was dropped before producing a result (e.g. it panicked).
    Aborted,
}

/// Read-only view of one registered key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySnapshot {
    pub key: Key,
    pub weight: PriorityWeight,
    /// Weight the key had before it was last marked inactive.
    pub last_active_weight: PriorityWeight,
    pub queued: usize,
    pub in_flight: usize,
    pub boosted_sub_keys: Vec<SubKey>,
    pub retained: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    /// Total entries accepted.
    pub enqueued: u64,
    /// Total entries handed to an executor.
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: u64,
    /// Total entries removed before dispatch (cancel, remove or close).
    pub cancelled: u64,
    /// Entries currently waiting.
    pub queued: u64,
    /// Entries currently executing.
    pub in_flight: u64,
    /// Keys currently registered.
    pub active_keys: u64,
    /// Sum of queue time (nanoseconds) of dispatched entries.
    pub queue_time_sum_ns: u64,
    /// Number of samples in `queue_time_sum_ns`.
    pub queue_time_samples: u64,
    /// Percentile estimates derived from the histogram buckets.
    pub queue_time_p95_ns: u64,
    pub queue_time_p99_ns: u64,
    pub queue_time_histogram: Vec<QueueTimeBucket>,
}

#[derive(Clone, Debug, Default)]
pub struct QueueTimeBucket {
    pub le_ns: u64,
    pub count: u64,
}
