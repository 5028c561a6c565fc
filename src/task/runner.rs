//! Bounded background execution of decode work.
//!
//! # Coalescing
//!
//! With [`RunnerConfig::coalesce`] enabled, tasks for the same key run one
//! at a time. The first task becomes the leader; later ones wait until it
//! finishes and then run their own work, which normally finds the leader's
//! result in the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify, Semaphore};
use tracing::{debug, error, info};

use super::context::ResultContext;
use super::handle::{CancelToken, TaskHandle, TaskResult};
use crate::cache::CacheKey;
use crate::decode::PixelBuffer;
use crate::error::DecodeError;

/// Default worker count when the parallelism of the host is unknown.
pub const DEFAULT_WORKERS: usize = 4;

type Work = Box<dyn FnOnce() -> TaskResult + Send + 'static>;
type Deliver = Box<dyn FnOnce(TaskResult) + Send + 'static>;

/// Task runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of tasks decoding at once
    pub workers: usize,

    /// Run tasks for the same key one after another
    pub coalesce: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_WORKERS),
            coalesce: false,
        }
    }
}

struct RunnerInner {
    handle: Handle,
    semaphore: Semaphore,
    workers: usize,
    coalesce: bool,

    /// Keys with a leader task running, for coalescing
    in_flight: Mutex<HashMap<CacheKey, watch::Sender<()>>>,

    /// Spawned tasks that have not finished
    active: AtomicUsize,
    idle: Notify,

    shut_down: AtomicBool,
}

/// Runs decode work on tokio's blocking pool with bounded concurrency.
///
/// Cloning a runner is cheap; clones share the same pool limit.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl TaskRunner {
    /// Create a runner on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. Use
    /// [`TaskRunner::with_handle`] to create one from another thread.
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_handle(config, Handle::current())
    }

    pub fn with_handle(config: RunnerConfig, handle: Handle) -> Self {
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(RunnerInner {
                handle,
                semaphore: Semaphore::new(workers),
                workers,
                coalesce: config.coalesce,
                in_flight: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Submit work for `key`. The returned handle resolves to its result.
    pub fn submit<F>(&self, key: CacheKey, work: F) -> TaskHandle
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let Some(active) = self.admit() else {
            return TaskHandle::ready(Err(DecodeError::Cancelled));
        };

        let (tx, rx) = oneshot::channel();
        let token = CancelToken::new();
        self.spawn(
            active,
            key,
            Box::new(work),
            token.clone(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        TaskHandle::new(rx, token)
    }

    /// Submit work for `key` and run exactly one of the callbacks on `ctx`
    /// when it finishes.
    ///
    /// Cancelling the returned token before the callback runs suppresses it.
    pub fn submit_with_callbacks<F, S, E>(
        &self,
        key: CacheKey,
        work: F,
        ctx: &ResultContext,
        on_success: S,
        on_failure: E,
    ) -> CancelToken
    where
        F: FnOnce() -> TaskResult + Send + 'static,
        S: FnOnce(PixelBuffer) + Send + 'static,
        E: FnOnce(DecodeError) + Send + 'static,
    {
        let token = CancelToken::new();
        let delivery = ctx.delivery();
        let guard = token.clone();

        let deliver: Deliver = Box::new(move |result| {
            delivery.send(Box::new(move || {
                if guard.is_cancelled() {
                    return;
                }
                match result {
                    Ok(buffer) => on_success(buffer),
                    Err(err) => on_failure(err),
                }
            }));
        });

        match self.admit() {
            Some(active) => self.spawn(active, key, Box::new(work), token.clone(), deliver),
            None => deliver(Err(DecodeError::Cancelled)),
        }
        token
    }

    /// Count a new task as active, unless the runner is shut down.
    ///
    /// The count goes up before the flag is read, so a concurrent
    /// `shutdown` either rejects the task here or waits for it.
    fn admit(&self) -> Option<ActiveGuard> {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.inner.clone());
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    fn spawn(
        &self,
        active: ActiveGuard,
        key: CacheKey,
        work: Work,
        token: CancelToken,
        deliver: Deliver,
    ) {
        let inner = self.inner.clone();
        self.inner.handle.spawn(async move {
            let _active = active;
            let result = inner.run(&key, work, &token).await;
            if token.is_cancelled() {
                debug!(key = key.as_str(), "Task cancelled, result not delivered");
                return;
            }
            deliver(result);
        });
    }

    /// Stop accepting work and wait for queued and running tasks to finish.
    ///
    /// Submissions after shutdown resolve to [`DecodeError::Cancelled`].
    pub async fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            info!(
                active = self.active_tasks(),
                "Shutting down task runner"
            );
        }

        loop {
            let idle = self.inner.idle.notified();
            if self.active_tasks() == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Tasks submitted and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }
}

impl RunnerInner {
    async fn run(self: &Arc<Self>, key: &CacheKey, work: Work, token: &CancelToken) -> TaskResult {
        let _leader = if self.coalesce {
            Some(self.lead_or_wait(key).await)
        } else {
            None
        };

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| DecodeError::Cancelled)?;

        if token.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let result = tokio::task::spawn_blocking(work).await;
        drop(permit);

        match result {
            Ok(result) => result,
            Err(e) => {
                error!(key = key.as_str(), "Decode task failed: {}", e);
                Err(DecodeError::Cancelled)
            }
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, watch::Sender<()>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the leader for `key`, waiting for any current leader first.
    async fn lead_or_wait(self: &Arc<Self>, key: &CacheKey) -> LeaderGuard {
        loop {
            let mut done = {
                let mut in_flight = self.lock_in_flight();
                match in_flight.get(key) {
                    Some(leader) => leader.subscribe(),
                    None => {
                        let (tx, _) = watch::channel(());
                        in_flight.insert(key.clone(), tx);
                        return LeaderGuard {
                            inner: self.clone(),
                            key: key.clone(),
                        };
                    }
                }
            };

            debug!(key = key.as_str(), "Waiting for in-flight task");
            // Resolves once the leader drops its sender
            let _ = done.changed().await;
        }
    }
}

/// Marks a spawned task finished, waking `shutdown` when none remain.
struct ActiveGuard(Arc<RunnerInner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Releases leadership of a key, waking tasks waiting on it.
struct LeaderGuard {
    inner: Arc<RunnerInner>,
    key: CacheKey,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.inner.lock_in_flight().remove(&self.key);
    }
}
