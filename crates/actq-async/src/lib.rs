//! Tokio front end for `actq-core`.
//!
//! [`ActionScheduler`] owns a single dispatch loop that hands queued
//! operations to an [`Executor`] with at most `concurrency_limit` executions
//! in flight. Callers enqueue `(key, operation, args)` and await the
//! [`PendingResult`]; any clone of the scheduler can reprioritize, cancel or
//! close while work is running.

mod dispatch;
mod error;
mod executor;
mod pending;


use std::sync::Arc;

pub use actq_core::{
    ConfigError, Key, KeySnapshot, Priority, PriorityWeight, QueueTimeBucket, SchedulerConfig,
    SchedulerStats, SubKey, prometheus,
};
use actq_core::{EnqueueResult, QueueEntry, Scheduler};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::dispatch::{Job, Shared};
pub use crate::error::{BuildError, ScheduleError};
pub use crate::executor::{Executor, FnExecutor, executor_fn};
pub use crate::pending::PendingResult;

/// Priority scheduler in front of one shared [`Executor`].
///
/// Cheap to clone; all clones drive the same queues and dispatch loop.
pub struct ActionScheduler<E: Executor> {
    shared: Arc<Shared<E>>,
}

impl<E: Executor> Clone for ActionScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Executor> ActionScheduler<E> {
    /// Builds a scheduler on the current Tokio runtime.
    pub fn new(config: SchedulerConfig, executor: E) -> Result<Self, BuildError> {
        ActionSchedulerBuilder::new().config(config).build(executor)
    }

    /// Queues `operation(args)` under `key`.
    ///
    /// A new key is registered at `priority`; an existing key keeps the
    /// weight it already has. The returned future resolves with the
    /// executor's result, or with a [`ScheduleError`] if the entry never ran.
    pub fn enqueue(
        &self,
        key: impl Into<Key>,
        priority: impl Into<PriorityWeight>,
        operation: impl Into<String>,
        args: E::Args,
    ) -> PendingResult<E::Output, E::Error> {
        self.submit(key.into(), None, priority.into(), operation.into(), args)
    }

    /// Like [`ActionScheduler::enqueue`], placing the entry in a sub-key lane
    /// that [`ActionScheduler::boost_sub_key`] can promote.
    pub fn enqueue_sub_key(
        &self,
        key: impl Into<Key>,
        sub_key: impl Into<SubKey>,
        priority: impl Into<PriorityWeight>,
        operation: impl Into<String>,
        args: E::Args,
    ) -> PendingResult<E::Output, E::Error> {
        self.submit(
            key.into(),
            Some(sub_key.into()),
            priority.into(),
            operation.into(),
            args,
        )
    }

    fn submit(
        &self,
        key: Key,
        sub_key: Option<SubKey>,
        weight: PriorityWeight,
        operation: String,
        args: E::Args,
    ) -> PendingResult<E::Output, E::Error> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let job = Job { args, tx };
        let core = &self.shared.core;
        let result = match sub_key {
            Some(sub_key) => core.enqueue_sub_key(key.clone(), sub_key, weight, operation, job),
            None => core.enqueue(key.clone(), weight, operation, job),
        };

        match result {
            EnqueueResult::Enqueued { seq } => {
                self.shared.kick();
                PendingResult::new(key, rx).with_seq(seq)
            }
            EnqueueResult::Closed(job) => {
                job.reject(ScheduleError::Closed);
                PendingResult::new(key, rx)
            }
        }
    }

    /// Changes `key`'s weight. Takes effect at the next dispatch decision;
    /// running executions are not touched. Returns `false` for unknown keys.
    pub fn update_priority(&self, key: impl Into<Key>, priority: impl Into<PriorityWeight>) -> bool {
        let updated = self.shared.core.update_priority(&key.into(), priority);
        if updated {
            self.shared.kick();
        }
        updated
    }

    /// Drops every queued entry of `key`; their futures resolve with
    /// [`ScheduleError::Cancelled`]. In-flight executions finish normally.
    /// Returns the number of cancelled entries.
    pub fn cancel_key(&self, key: impl Into<Key>) -> usize {
        let cancelled = self.shared.core.cancel_key(&key.into());
        self.reject_all(cancelled, || ScheduleError::Cancelled)
    }

    /// Alias of [`ActionScheduler::cancel_key`].
    pub fn clear_queue(&self, key: impl Into<Key>) -> usize {
        self.cancel_key(key)
    }

    /// Sends `key` to the back of the line. Its queued entries still run once
    /// no active key has work.
    pub fn mark_inactive(&self, key: impl Into<Key>) -> bool {
        let marked = self.shared.core.mark_inactive(&key.into());
        if marked {
            self.shared.kick();
        }
        marked
    }

    /// Forgets `key` entirely, cancelling its queued entries. Its in-flight
    /// executions keep counting against the per-key limit of a key
    /// re-created under the same name until they finish.
    pub fn remove_key(&self, key: impl Into<Key>) -> usize {
        let cancelled = self.shared.core.remove_key(&key.into());
        self.reject_all(cancelled, || ScheduleError::Cancelled)
    }

    /// Turns the boost of one sub-key lane on or off. Boosts stack.
    pub fn boost_sub_key(&self, key: impl Into<Key>, sub_key: impl Into<SubKey>, on: bool) -> bool {
        let changed = self
            .shared
            .core
            .boost_sub_key(&key.into(), &sub_key.into(), on);
        if changed {
            self.shared.kick();
        }
        changed
    }

    /// Stops accepting work. Queued entries resolve with
    /// [`ScheduleError::Closed`]; in-flight executions run to completion.
    pub fn close(&self) -> usize {
        let dropped = self.shared.core.close();
        self.reject_all(dropped, || ScheduleError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.core.is_closed()
    }

    /// Waits until nothing is queued or in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.core.is_drained() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.core.stats()
    }

    pub fn key_snapshot(&self, key: impl Into<Key>) -> Option<KeySnapshot> {
        self.shared.core.key_snapshot(&key.into())
    }

    pub fn keys(&self) -> Vec<KeySnapshot> {
        self.shared.core.keys()
    }

    pub fn config(&self) -> &SchedulerConfig {
        self.shared.core.config()
    }

    /// Maximum concurrent executions.
    pub fn in_flight_limit(&self) -> usize {
        self.shared.concurrency_limit
    }

    /// Executions handed to the executor and not yet settled.
    pub fn in_flight_active(&self) -> usize {
        self.shared.core.in_flight()
    }

    pub fn executor(&self) -> &E {
        &self.shared.executor
    }

    fn reject_all(
        &self,
        entries: Vec<QueueEntry<Job<E>>>,
        error: impl Fn() -> ScheduleError<E::Error>,
    ) -> usize {
        let count = entries.len();
        for entry in entries {
            debug!(key = %entry.key, seq = entry.seq, operation = %entry.operation, "rejected queued entry");
            entry.payload.reject(error());
        }
        if count > 0 {
            self.shared.settle();
        }
        count
    }
}

/// Builder for [`ActionScheduler`].
#[derive(Debug, Clone, Default)]
pub struct ActionSchedulerBuilder {
    config: SchedulerConfig,
    runtime: Option<Handle>,
}

impl ActionSchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    /// Cap on in-flight executions per key; `0` means unlimited.
    pub fn per_key_limit(mut self, limit: usize) -> Self {
        self.config.per_key_limit = limit;
        self
    }

    pub fn boost_offset(mut self, offset: i64) -> Self {
        self.config.boost_offset = offset;
        self
    }

    /// Runtime that runs the dispatch loop and executions. Defaults to the
    /// runtime `build` is called on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build<E: Executor>(self, executor: E) -> Result<ActionScheduler<E>, BuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        let concurrency_limit = self.config.concurrency_limit;
        let core = Scheduler::new(self.config)?;
        debug!(
            concurrency_limit,
            per_key_limit = core.config().per_key_limit,
            boost_offset = core.config().boost_offset,
            "action scheduler built"
        );

        Ok(ActionScheduler {
            shared: Arc::new(Shared {
                core,
                executor,
                permits: Arc::new(Semaphore::new(concurrency_limit)),
                concurrency_limit,
                runtime,
                settled: Notify::new(),
            }),
        })
    }
}
