use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::api::{
    DequeueResult, Dispatch, EnqueueResult, InFlightTicket, Key, KeySnapshot, Outcome,
    PriorityWeight, QueueEntry, QueueTimeBucket, SchedulerStats, SubKey,
};
use crate::config::{ConfigError, SchedulerConfig};
use crate::state::{Inner, LoopState, QUEUE_TIME_BUCKETS_NS, StatsCounters, WorkSignal};

/// Priority scheduling state shared by every consumer of one execution resource.
///
/// Runtime agnostic: callers pull work with [`Scheduler::try_dequeue`] (or the
/// blocking variants) and hand every dispatched ticket back through
/// [`Scheduler::complete`]. The Tokio dispatch loop in `actq-async` is built on
/// [`Scheduler::start_dispatch`] and [`Scheduler::next_or_idle`].
pub struct Scheduler<T> {
    config: SchedulerConfig,
    inner: Mutex<Inner<T>>,
    stats: StatsCounters,
    work_signal: WorkSignal,
}

impl<T> Scheduler<T> {
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(Inner::new(config.boost_offset, config.per_key_limit)),
            config,
            stats: StatsCounters::new(),
            work_signal: WorkSignal::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Appends an operation to `key`'s queue, registering the key at
    /// `priority` if it is not known yet.
    pub fn enqueue(
        &self,
        key: impl Into<Key>,
        priority: impl Into<PriorityWeight>,
        operation: impl Into<String>,
        payload: T,
    ) -> EnqueueResult<T> {
        self.enqueue_entry(key.into(), None, priority.into(), operation.into(), payload)
    }

    /// Like [`Scheduler::enqueue`], tagging the entry with a sub-key lane.
    pub fn enqueue_sub_key(
        &self,
        key: impl Into<Key>,
        sub_key: impl Into<SubKey>,
        priority: impl Into<PriorityWeight>,
        operation: impl Into<String>,
        payload: T,
    ) -> EnqueueResult<T> {
        self.enqueue_entry(
            key.into(),
            Some(sub_key.into()),
            priority.into(),
            operation.into(),
            payload,
        )
    }

    fn enqueue_entry(
        &self,
        key: Key,
        sub_key: Option<SubKey>,
        weight: PriorityWeight,
        operation: String,
        payload: T,
    ) -> EnqueueResult<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return EnqueueResult::Closed(payload);
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        if inner.registry.get(&key).is_none() {
            debug!(key = %key, %weight, "registered key");
        }
        inner.registry.push(
            QueueEntry {
                key,
                sub_key,
                operation,
                payload,
                seq,
                enqueued_at: Instant::now(),
            },
            weight,
        );
        drop(inner);

        StatsCounters::add(&self.stats.enqueued, 1);
        self.work_signal.notify_all();
        EnqueueResult::Enqueued { seq }
    }

    /// Hands out the next entry of the most urgent key without blocking.
    pub fn try_dequeue(&self) -> DequeueResult<T> {
        let mut inner = self.inner.lock();
        self.dequeue_locked(&mut inner)
    }

    fn dequeue_locked(&self, inner: &mut Inner<T>) -> DequeueResult<T> {
        if inner.closed {
            return DequeueResult::Closed;
        }
        if inner.in_flight >= self.config.concurrency_limit {
            return DequeueResult::Saturated;
        }

        let Some(key) = inner.registry.peek_highest_priority_key() else {
            return DequeueResult::Empty;
        };
        let Some(entry) = inner.registry.pop_entry(&key) else {
            debug_assert!(false, "selected key {key} has an empty queue");
            return DequeueResult::Empty;
        };
        let Some(state) = inner.registry.get_mut(&key) else {
            debug_assert!(false, "selected key {key} vanished");
            return DequeueResult::Empty;
        };
        state.in_flight += 1;
        inner.in_flight += 1;

        let now = Instant::now();
        let queue_time_ns = now
            .duration_since(entry.enqueued_at)
            .as_nanos()
            .min(u128::from(u64::MAX)) as u64;
        StatsCounters::add(&self.stats.dispatched, 1);
        self.stats.record_queue_time(queue_time_ns);

        debug!(
            key = %key,
            seq = entry.seq,
            operation = %entry.operation,
            in_flight = inner.in_flight,
            "dispatching entry"
        );

        let ticket = InFlightTicket {
            key,
            seq: entry.seq,
            dispatched_at: now,
        };
        DequeueResult::Dispatched(Dispatch { entry, ticket })
    }

    /// Blocks the current thread until an entry is dispatched or the
    /// scheduler closes.
    pub fn dequeue_blocking(&self) -> DequeueResult<T> {
        loop {
            let observed = self.work_signal.current();
            match self.try_dequeue() {
                DequeueResult::Empty | DequeueResult::Saturated => {
                    self.work_signal.wait_for_change(observed);
                }
                other => return other,
            }
        }
    }

    /// Like [`Scheduler::dequeue_blocking`] but gives up after `timeout`,
    /// returning the last non-dispatch result.
    pub fn dequeue_blocking_timeout(&self, timeout: Duration) -> DequeueResult<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let observed = self.work_signal.current();
            let result = self.try_dequeue();
            match result {
                DequeueResult::Empty | DequeueResult::Saturated => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return result;
                    }
                    self.work_signal.wait_for_change_timeout(observed, remaining);
                }
                other => return other,
            }
        }
    }

    /// Releases the concurrency slot held by `ticket`.
    ///
    /// The key is garbage-collected if this was its last outstanding work.
    /// If the key was removed meanwhile, the slot is charged to whatever is
    /// registered under the same name now, or to nobody.
    pub fn complete(&self, ticket: InFlightTicket, outcome: Outcome) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.in_flight > 0, "completion without in-flight entry");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        let collected = inner.registry.complete(&ticket.key);
        drop(inner);

        let counter = match outcome {
            Outcome::Succeeded => &self.stats.succeeded,
            Outcome::Failed => &self.stats.failed,
            Outcome::Aborted => &self.stats.aborted,
        };
        StatsCounters::add(counter, 1);

        debug!(
            key = %ticket.key,
            seq = ticket.seq,
            elapsed_ms = ticket.dispatched_at.elapsed().as_millis() as u64,
            collected,
            "entry completed"
        );
        self.work_signal.notify_all();
    }

    /// Changes the weight of `key`. Entries already in flight are unaffected.
    /// Returns `false` (and does nothing) for unknown keys.
    pub fn update_priority(&self, key: &Key, priority: impl Into<PriorityWeight>) -> bool {
        let weight = priority.into();
        let updated = {
            let mut inner = self.inner.lock();
            let updated = inner.registry.update_weight(key, weight);
            // Reactivating an empty retained key releases it.
            inner.registry.collect(key);
            updated
        };
        if updated {
            debug!(key = %key, %weight, "updated key priority");
            self.work_signal.notify_all();
        }
        updated
    }

    /// Removes every queued (not yet dispatched) entry of `key` and returns
    /// them oldest first. In-flight entries keep running.
    pub fn cancel_key(&self, key: &Key) -> Vec<QueueEntry<T>> {
        let mut inner = self.inner.lock();
        let Some(state) = inner.registry.get_mut(key) else {
            return Vec::new();
        };
        let cancelled = state.queue.remove_all();
        let in_flight = state.in_flight;
        inner.registry.collect(key);
        drop(inner);

        StatsCounters::add(&self.stats.cancelled, cancelled.len() as u64);
        debug!(key = %key, cancelled = cancelled.len(), in_flight, "cancelled key");
        self.work_signal.notify_all();
        cancelled
    }

    /// Demotes `key` to [`PriorityWeight::INACTIVE`] and keeps it registered
    /// even once it has no work left.
    pub fn mark_inactive(&self, key: &Key) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.registry.get_mut(key) else {
            return false;
        };
        state.weight = PriorityWeight::INACTIVE;
        state.retained = true;
        let last_active = state.last_active_weight;
        drop(inner);

        debug!(key = %key, %last_active, "marked key inactive");
        self.work_signal.notify_all();
        true
    }

    /// Drops `key` and its queue. Queued entries are returned oldest first;
    /// in-flight entries still settle through [`Scheduler::complete`].
    pub fn remove_key(&self, key: &Key) -> Vec<QueueEntry<T>> {
        let Some(mut state) = self.inner.lock().registry.remove(key) else {
            return Vec::new();
        };
        let removed = state.queue.remove_all();

        StatsCounters::add(&self.stats.cancelled, removed.len() as u64);
        debug!(key = %key, removed = removed.len(), in_flight = state.in_flight, "removed key");
        self.work_signal.notify_all();
        removed
    }

    /// Adds or reverts one boost of the `sub_key` lane of `key`.
    /// Returns `false` for unknown keys.
    pub fn boost_sub_key(&self, key: &Key, sub_key: &SubKey, on: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(state) = inner.registry.get_mut(key) else {
            return false;
        };
        state.queue.boost(sub_key, on);
        let boosts = state.queue.boosts(sub_key);
        drop(inner);

        debug!(key = %key, sub_key = %sub_key, on, boosts, "boosted sub-key");
        self.work_signal.notify_all();
        true
    }

    /// Stops accepting work and returns every queued entry, oldest first.
    /// In-flight entries still settle through [`Scheduler::complete`].
    pub fn close(&self) -> Vec<QueueEntry<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Vec::new();
        }
        inner.closed = true;
        let drained = inner.registry.drain_all();
        drop(inner);

        StatsCounters::add(&self.stats.cancelled, drained.len() as u64);
        debug!(drained = drained.len(), "scheduler closed");
        self.work_signal.notify_all();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// `true` when nothing is queued and nothing is in flight.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.in_flight == 0 && inner.registry.queued() == 0
    }

    /// Moves the dispatch loop from idle to running if there is work it could
    /// hand out right now. Returns `true` if the caller must drive the loop.
    pub fn start_dispatch(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.loop_state == LoopState::Running
            || inner.closed
            || inner.in_flight >= self.config.concurrency_limit
            || !inner.registry.has_runnable()
        {
            return false;
        }
        inner.loop_state = LoopState::Running;
        debug!("dispatch loop running");
        true
    }

    /// Dequeue step of the dispatch loop: like [`Scheduler::try_dequeue`],
    /// but anything other than a dispatch moves the loop back to idle in the
    /// same atomic step, so a concurrent enqueue can always restart it.
    pub fn next_or_idle(&self) -> DequeueResult<T> {
        let mut inner = self.inner.lock();
        let result = self.dequeue_locked(&mut inner);
        if !matches!(result, DequeueResult::Dispatched(_)) {
            inner.loop_state = LoopState::Idle;
            debug!("dispatch loop idle");
        }
        result
    }

    /// Forces the loop state back to idle (used when a driver stops early).
    pub fn stop_dispatch(&self) {
        self.inner.lock().loop_state = LoopState::Idle;
    }

    /// Entries handed out and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.lock().loop_state == LoopState::Running
    }

    pub fn peek_highest_priority_key(&self) -> Option<Key> {
        self.inner.lock().registry.peek_highest_priority_key()
    }

    pub fn key_snapshot(&self, key: &Key) -> Option<KeySnapshot> {
        self.inner.lock().registry.snapshot(key)
    }

    /// Snapshots of all registered keys, most urgent first.
    pub fn keys(&self) -> Vec<KeySnapshot> {
        self.inner.lock().registry.snapshots()
    }

    pub fn stats(&self) -> SchedulerStats {
        let (queued, in_flight, active_keys) = {
            let inner = self.inner.lock();
            (
                inner.registry.queued() as u64,
                inner.in_flight as u64,
                inner.registry.len() as u64,
            )
        };

        let queue_time_histogram = QUEUE_TIME_BUCKETS_NS
            .iter()
            .enumerate()
            .map(|(idx, bound)| QueueTimeBucket {
                le_ns: *bound,
                count: self.stats.queue_time_buckets[idx].load(Ordering::Relaxed),
            })
            .collect::<Vec<_>>();

        let total_samples: u64 = queue_time_histogram.iter().map(|b| b.count).sum();
        let percentile = |pct: f64| -> u64 {
            if total_samples == 0 {
                return 0;
            }
            let target = (total_samples as f64 * pct).ceil() as u64;
            let mut cumulative = 0u64;
            for bucket in &queue_time_histogram {
                cumulative = cumulative.saturating_add(bucket.count);
                if cumulative >= target {
                    return bucket.le_ns;
                }
            }
            queue_time_histogram
                .last()
                .map(|bucket| bucket.le_ns)
                .unwrap_or(0)
        };

        SchedulerStats {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            queued,
            in_flight,
            active_keys,
            queue_time_sum_ns: self.stats.queue_time_sum_ns.load(Ordering::Relaxed),
            queue_time_samples: self.stats.queue_time_samples.load(Ordering::Relaxed),
            queue_time_p95_ns: percentile(0.95),
            queue_time_p99_ns: percentile(0.99),
            queue_time_histogram,
        }
    }
}
