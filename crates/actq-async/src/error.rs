use actq_core::ConfigError;

/// Why an enqueued operation did not produce an executor result.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError<E> {
    /// The executor ran the operation and failed; forwarded verbatim.
    #[error("executor failed: {0}")]
    Executor(E),
    /// The entry was removed by `cancel_key`/`remove_key` before it ran.
    /// Callers normally suppress this.
    #[error("operation cancelled before dispatch")]
    Cancelled,
    /// The scheduler was closed before the entry ran.
    #[error("scheduler closed")]
    Closed,
    /// The execution was dropped without a result (the executor panicked).
    #[error("execution aborted")]
    Aborted,
}

impl<E> ScheduleError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScheduleError::Cancelled)
    }

    /// The executor's own error, if that is what this is.
    pub fn into_executor_error(self) -> Option<E> {
        match self {
            ScheduleError::Executor(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no Tokio runtime available; build inside a runtime or pass a handle")]
    NoRuntime,
}
