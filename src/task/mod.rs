//! Asynchronous execution of decode work.
//!
//! Work submitted to a [`TaskRunner`] runs on tokio's blocking pool, at most
//! [`RunnerConfig::workers`] tasks at a time. Results come back either
//! through a [`TaskHandle`] future or as a callback queued on a
//! [`ResultContext`] that the caller drains on its own thread.

mod context;
mod handle;
mod runner;

pub use context::ResultContext;
pub use handle::{CancelToken, TaskHandle, TaskResult};
pub use runner::{RunnerConfig, TaskRunner, DEFAULT_WORKERS};
