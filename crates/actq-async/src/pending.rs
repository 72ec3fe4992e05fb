use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actq_core::Key;
use futures_core::FusedFuture;
use tokio::sync::oneshot;

use crate::error::ScheduleError;

pub(crate) type ResultSender<O, E> = oneshot::Sender<Result<O, ScheduleError<E>>>;

/// Future of one enqueued operation. Resolves exactly once.
///
/// Dropping it does not cancel the operation; use
/// [`ActionScheduler::cancel_key`](crate::ActionScheduler::cancel_key).
#[must_use = "the operation result is only observable through this future"]
pub struct PendingResult<O, E> {
    key: Key,
    seq: Option<u64>,
    rx: oneshot::Receiver<Result<O, ScheduleError<E>>>,
    done: bool,
}

impl<O, E> PendingResult<O, E> {
    pub(crate) fn new(key: Key, rx: oneshot::Receiver<Result<O, ScheduleError<E>>>) -> Self {
        Self {
            key,
            seq: None,
            rx,
            done: false,
        }
    }

    pub(crate) fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Insertion sequence of the entry, `None` if it was never queued.
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }
}

impl<O, E> Future for PendingResult<O, E> {
    type Output = Result<O, ScheduleError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.done = true;
                Poll::Ready(result.unwrap_or(Err(ScheduleError::Aborted)))
            }
        }
    }
}

impl<O, E> FusedFuture for PendingResult<O, E> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}
