use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::decode::PixelBuffer;
use crate::error::DecodeError;

/// Result of one decode task.
pub type TaskResult = Result<PixelBuffer, DecodeError>;

/// Shared cancellation flag for callback-style submissions.
///
/// Cancelling suppresses the callback if it has not run yet. Work that
/// already started still finishes and its result is still cached.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Future resolving to the result of a submitted task.
///
/// Awaiting the handle delivers the result on the awaiting task.
/// [`cancel`](TaskHandle::cancel) or dropping the handle suppresses
/// delivery; the handle then resolves to [`DecodeError::Cancelled`].
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<TaskResult>,
    token: CancelToken,
}

impl TaskHandle {
    pub(crate) fn new(rx: oneshot::Receiver<TaskResult>, token: CancelToken) -> Self {
        Self { rx, token }
    }

    /// Handle that is already resolved with `result`.
    pub(crate) fn ready(result: TaskResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(rx, CancelToken::new())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(DecodeError::Cancelled));
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The worker dropped its sender without a result
            Poll::Ready(Err(_)) => Poll::Ready(Err(DecodeError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
