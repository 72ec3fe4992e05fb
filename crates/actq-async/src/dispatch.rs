use std::sync::Arc;

use actq_core::{DequeueResult, Dispatch, InFlightTicket, Outcome, Scheduler};
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

use crate::error::ScheduleError;
use crate::executor::Executor;
use crate::pending::ResultSender;

/// Queue payload: the executor arguments plus the caller's result channel.
pub(crate) struct Job<E: Executor> {
    pub(crate) args: E::Args,
    pub(crate) tx: ResultSender<E::Output, E::Error>,
}

impl<E: Executor> Job<E> {
    pub(crate) fn reject(self, error: ScheduleError<E::Error>) {
        let _ = self.tx.send(Err(error));
    }
}

pub(crate) struct Shared<E: Executor> {
    pub(crate) core: Scheduler<Job<E>>,
    pub(crate) executor: E,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) concurrency_limit: usize,
    pub(crate) runtime: Handle,
    /// Notified whenever queued or in-flight work settles.
    pub(crate) settled: Notify,
}

impl<E: Executor> Shared<E> {
    /// Re-evaluation point: starts the dispatch loop if it is idle and there
    /// is runnable work.
    pub(crate) fn kick(self: &Arc<Self>) {
        if self.core.start_dispatch() {
            self.runtime.spawn(Arc::clone(self).run());
        }
    }

    /// Dispatch loop. Takes a concurrency slot, then asks the core for the
    /// most urgent entry, so priority changes made while waiting for the slot
    /// are honored. Each entry runs on its own task; the loop never waits for
    /// an execution to finish.
    async fn run(self: Arc<Self>) {
        loop {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    self.core.stop_dispatch();
                    return;
                }
            };

            match self.core.next_or_idle() {
                DequeueResult::Dispatched(dispatch) => {
                    self.runtime
                        .spawn(Arc::clone(&self).execute(dispatch, permit));
                }
                DequeueResult::Saturated | DequeueResult::Empty | DequeueResult::Closed => {
                    return;
                }
            }
        }
    }

    async fn execute(self: Arc<Self>, dispatch: Dispatch<Job<E>>, permit: OwnedSemaphorePermit) {
        // Dropped last: the slot frees only after the core saw the completion.
        let _permit = permit;
        let Dispatch { entry, ticket } = dispatch;
        let mut guard = InFlightGuard::new(Arc::clone(&self), ticket);
        let Job { args, tx } = entry.payload;

        trace!(key = %entry.key, seq = entry.seq, operation = %entry.operation, "executing");
        let result = self.executor.execute(&entry.operation, args).await;

        guard.finish(if result.is_ok() {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        });
        let _ = tx.send(result.map_err(ScheduleError::Executor));
    }

    pub(crate) fn settle(&self) {
        self.settled.notify_waiters();
    }
}

/// Reports the completion of an in-flight entry exactly once, including when
/// the execution unwinds.
struct InFlightGuard<E: Executor> {
    shared: Arc<Shared<E>>,
    ticket: Option<InFlightTicket>,
}

impl<E: Executor> InFlightGuard<E> {
    fn new(shared: Arc<Shared<E>>, ticket: InFlightTicket) -> Self {
        Self {
            shared,
            ticket: Some(ticket),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(ticket) = self.ticket.take() {
            self.shared.core.complete(ticket, outcome);
            self.shared.kick();
            self.shared.settle();
        }
    }
}

impl<E: Executor> Drop for InFlightGuard<E> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.as_ref() {
            warn!(key = %ticket.key(), seq = ticket.seq(), "execution dropped without a result");
        }
        self.finish(Outcome::Aborted);
    }
}
