use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::registry::Registry;

/// Upper bounds of the queue-time histogram buckets, in nanoseconds.
pub(crate) const QUEUE_TIME_BUCKETS_NS: [u64; 10] = [
    100_000,
    1_000_000,
    5_000_000,
    10_000_000,
    50_000_000,
    100_000_000,
    500_000_000,
    1_000_000_000,
    5_000_000_000,
    u64::MAX,
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LoopState {
    Idle,
    Running,
}

/// Everything mutated by the control operations; guarded by one lock so each
/// operation is a single atomic step.
#[derive(Debug)]
pub(crate) struct Inner<T> {
    pub(crate) registry: Registry<T>,
    pub(crate) next_seq: u64,
    pub(crate) in_flight: usize,
    pub(crate) closed: bool,
    pub(crate) loop_state: LoopState,
}

impl<T> Inner<T> {
    pub(crate) fn new(boost_offset: i64, per_key_limit: usize) -> Self {
        Self {
            registry: Registry::new(boost_offset, per_key_limit),
            next_seq: 0,
            in_flight: 0,
            closed: false,
            loop_state: LoopState::Idle,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StatsCounters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) aborted: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) queue_time_sum_ns: AtomicU64,
    pub(crate) queue_time_samples: AtomicU64,
    pub(crate) queue_time_buckets: [AtomicU64; QUEUE_TIME_BUCKETS_NS.len()],
}

impl StatsCounters {
    pub(crate) fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            queue_time_sum_ns: AtomicU64::new(0),
            queue_time_samples: AtomicU64::new(0),
            queue_time_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub(crate) fn add(counter: &AtomicU64, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut current = counter.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(delta);
            match counter.compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn record_queue_time(&self, queue_time_ns: u64) {
        Self::add(&self.queue_time_sum_ns, queue_time_ns);
        Self::add(&self.queue_time_samples, 1);
        for (idx, bound) in QUEUE_TIME_BUCKETS_NS.iter().enumerate() {
            if queue_time_ns <= *bound {
                Self::add(&self.queue_time_buckets[idx], 1);
                break;
            }
        }
    }
}

/// Sequence-numbered wakeup used by blocking dequeuers.
#[derive(Debug)]
pub(crate) struct WorkSignal {
    mutex: Mutex<()>,
    condvar: Condvar,
    seq: AtomicU64,
}

impl WorkSignal {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    pub(crate) fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.seq.fetch_add(1, Ordering::Release);
        self.condvar.notify_all();
    }

    pub(crate) fn wait_for_change(&self, last_seen: u64) {
        let mut guard = self.mutex.lock();
        while self.seq.load(Ordering::Acquire) == last_seen {
            self.condvar.wait(&mut guard);
        }
    }

    /// Returns `false` if the timeout elapsed without a change.
    pub(crate) fn wait_for_change_timeout(&self, last_seen: u64, timeout: Duration) -> bool {
        let mut guard = self.mutex.lock();
        while self.seq.load(Ordering::Acquire) == last_seen {
            if self.condvar.wait_for(&mut guard, timeout).timed_out() {
                return self.seq.load(Ordering::Acquire) != last_seen;
            }
        }
        true
    }
}
