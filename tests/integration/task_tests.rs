//! Background loading integration tests.
//!
//! Tests verify:
//! - Handles resolve with the decoded buffer
//! - Callbacks run exactly once on the draining thread
//! - Cancellation suppresses delivery but the result is still cached
//! - Coalescing lets concurrent requests for one key share a decode

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use pixel_loader::cache::{Cache, CacheKey};
use pixel_loader::decode::{ImageSource, PixelBuffer, SourceInfo};
use pixel_loader::error::{DecodeError, SourceError};
use pixel_loader::loader::{ImageLoader, SourceList, Target};
use pixel_loader::task::{ResultContext, RunnerConfig, TaskRunner};

use super::test_utils::FlakySource;

fn loader() -> ImageLoader {
    ImageLoader::new(Arc::new(Cache::with_memory_budget(32 * 1024 * 1024)))
}

/// Source whose decode takes a while, to widen race windows.
struct SlowSource {
    inner: FlakySource,
    delay: Duration,
}

impl ImageSource for SlowSource {
    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn info(&self) -> Result<SourceInfo, SourceError> {
        self.inner.info()
    }

    fn decode(&self, sample_factor: u32) -> Result<PixelBuffer, SourceError> {
        thread::sleep(self.delay);
        self.inner.decode(sample_factor)
    }
}

#[tokio::test]
async fn test_batch_through_runner() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig {
        workers: 3,
        coalesce: false,
    });

    let mut list = SourceList::new();
    for i in 0..6 {
        let name = format!("img-{}", i);
        list.push(
            CacheKey::new(name.clone()),
            Arc::new(FlakySource::new(&name, 100 + i * 100, 100, 0)),
        );
    }

    let handles: Vec<_> = list
        .iter()
        .map(|(key, source)| loader.load_bounded(&runner, source.clone(), key.clone(), 50, 50))
        .collect();

    for (index, handle) in handles.into_iter().enumerate() {
        let buffer = handle.await.unwrap();
        let key = list.key_at(index).unwrap();
        assert_eq!(loader.cache().lookup(key), Some(buffer));
    }
    assert_eq!(loader.cache().stats().memory_entries, 6);

    runner.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callbacks_run_on_draining_thread() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig::default());
    let mut ctx = ResultContext::new();
    let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let seen = threads.clone();
        let failed = threads.clone();
        loader.load_with_callbacks(
            &runner,
            Arc::new(FlakySource::new("cb", 64, 64, 0)),
            CacheKey::new(format!("cb-{}", i)),
            Target::Sampled(2),
            &ctx,
            move |_| seen.lock().unwrap().push(thread::current().id()),
            move |_| failed.lock().unwrap().push(thread::current().id()),
        );
    }

    assert_eq!(ctx.run_until_idle().await, 4);
    let here = thread::current().id();
    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 4);
    assert!(threads.iter().all(|id| *id == here));
}

#[tokio::test]
async fn test_failure_callback_receives_error() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig::default());
    let mut ctx = ResultContext::new();
    let error: Arc<Mutex<Option<DecodeError>>> = Arc::new(Mutex::new(None));

    let slot = error.clone();
    loader.load_with_callbacks(
        &runner,
        Arc::new(FlakySource::new("oom", 4096, 4096, usize::MAX)),
        CacheKey::new("oom"),
        Target::Sampled(1),
        &ctx,
        |_| panic!("decode should fail"),
        move |err| *slot.lock().unwrap() = Some(err),
    );

    ctx.run_until_idle().await;
    assert!(matches!(
        error.lock().unwrap().take(),
        Some(DecodeError::RetriesExhausted { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_request_still_caches() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig::default());
    let mut ctx = ResultContext::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let source = Arc::new(SlowSource {
        inner: FlakySource::new("slow", 200, 200, 0),
        delay: Duration::from_millis(30),
    });
    let (s, f) = (calls.clone(), calls.clone());
    let token = loader.load_with_callbacks(
        &runner,
        source,
        CacheKey::new("slow"),
        Target::Sampled(1),
        &ctx,
        move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        },
        move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        },
    );

    // Let the decode start before cancelling
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    assert_eq!(ctx.run_until_idle().await, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    runner.shutdown().await;
    assert!(loader.cache().lookup(&CacheKey::new("slow")).is_some());
}

#[tokio::test]
async fn test_timeout_is_caller_side_cancellation() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig::default());
    let source = Arc::new(SlowSource {
        inner: FlakySource::new("slow", 100, 100, 0),
        delay: Duration::from_millis(200),
    });

    let handle = loader.load_sampled(&runner, source, CacheKey::new("slow"), 1);
    let result = tokio::time::timeout(Duration::from_millis(10), handle).await;
    assert!(result.is_err());

    runner.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesced_requests_share_one_decode() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig {
        workers: 4,
        coalesce: true,
    });
    let source = Arc::new(SlowSource {
        inner: FlakySource::new("shared", 256, 256, 0),
        delay: Duration::from_millis(30),
    });

    let handles: Vec<_> = (0..5)
        .map(|_| {
            loader.load_bounded(&runner, source.clone(), CacheKey::new("shared"), 64, 64)
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(source.inner.decode_count(), 1);
}

#[tokio::test]
async fn test_shutdown_rejects_new_loads() {
    let loader = loader();
    let runner = TaskRunner::new(RunnerConfig::default());
    runner.shutdown().await;

    let result = loader
        .load_sampled(
            &runner,
            Arc::new(FlakySource::new("late", 8, 8, 0)),
            CacheKey::new("late"),
            1,
        )
        .await;
    assert!(matches!(result, Err(DecodeError::Cancelled)));
}

#[test]
fn test_runner_from_plain_thread() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let runner = TaskRunner::with_handle(RunnerConfig::default(), runtime.handle().clone());
    let loader = loader();
    let mut ctx = ResultContext::new();
    let width = Arc::new(AtomicUsize::new(0));

    let seen = width.clone();
    loader.load_with_callbacks(
        &runner,
        Arc::new(FlakySource::new("plain", 32, 32, 0)),
        CacheKey::new("plain"),
        Target::Sampled(2),
        &ctx,
        move |buffer| seen.store(buffer.width() as usize, Ordering::SeqCst),
        |err| panic!("unexpected failure: {}", err),
    );

    // Drain from this (non-runtime) thread
    runtime.block_on(ctx.run_until_idle());
    assert_eq!(width.load(Ordering::SeqCst), 16);
}
