//! Core of the actq priority action scheduler.
//!
//! Arbitrates one limited-concurrency execution resource (an embedded query
//! engine connection, a rate-limited remote API) between many logical keys:
//!
//! - each key owns a FIFO queue, optionally split into sub-key lanes;
//! - the next entry always comes from the key with the lowest weight, the
//!   longest waiting entry winning ties;
//! - weights are mutable and take effect at the next scheduling decision;
//! - at most `concurrency_limit` entries are in flight at any time;
//! - queued entries of a key can be cancelled without touching in-flight work.
//!
//! This crate is runtime agnostic. `actq-async` drives it from Tokio.

mod api;
mod config;
pub mod prometheus;
mod queue;
mod registry;
mod scheduler;
mod state;

#[cfg(test)]
mod tests;

pub use api::{
    DequeueResult, Dispatch, EnqueueResult, InFlightTicket, Key, KeySnapshot, Outcome, Priority,
    PriorityWeight, QueueEntry, QueueTimeBucket, SchedulerStats, SubKey,
};
pub use config::{
    ConfigError, ENV_BOOST_OFFSET, ENV_CONCURRENCY_LIMIT, ENV_PER_KEY_LIMIT, SchedulerConfig,
};
pub use queue::KeyQueue;
pub use registry::{KeyState, Registry};
pub use scheduler::Scheduler;
