use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A queued callback, or `None` when delivery was suppressed.
type Completion = Option<Box<dyn FnOnce() + Send + 'static>>;

/// Caller-owned queue on which task callbacks run.
///
/// Workers never call callbacks directly. They queue them here, and they
/// run on whichever thread drains the context with
/// [`run_pending`](ResultContext::run_pending) or
/// [`run_until_idle`](ResultContext::run_until_idle), typically the
/// application's main or UI thread.
pub struct ResultContext {
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,

    /// Submissions whose completion has not been drained yet
    outstanding: Arc<AtomicUsize>,
}

impl ResultContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve one completion slot for a submission.
    pub(crate) fn delivery(&self) -> Delivery {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Delivery {
            tx: self.tx.clone(),
            sent: false,
        }
    }

    /// Run every callback queued so far without waiting. Returns the number
    /// of callbacks run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.rx.try_recv() {
            ran += self.complete(completion);
        }
        ran
    }

    /// Run callbacks until every submission on this context has completed.
    /// Returns the number of callbacks run.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut ran = self.run_pending();
        while self.outstanding() > 0 {
            match self.rx.recv().await {
                Some(completion) => ran += self.complete(completion),
                None => break,
            }
        }
        ran
    }

    fn complete(&self, completion: Completion) -> usize {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        match completion {
            Some(callback) => {
                callback();
                1
            }
            None => 0,
        }
    }

    /// Submissions that have not completed on this context yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Default for ResultContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends exactly one completion to a [`ResultContext`].
///
/// Dropping it unsent queues an empty completion, so the context never
/// waits for a submission that will not deliver.
pub(crate) struct Delivery {
    tx: mpsc::UnboundedSender<Completion>,
    sent: bool,
}

impl Delivery {
    pub(crate) fn send(mut self, callback: Box<dyn FnOnce() + Send + 'static>) {
        self.sent = true;
        // The context may be gone; nothing to deliver to then
        let _ = self.tx.send(Some(callback));
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.sent {
            let _ = self.tx.send(None);
        }
    }
}
