//! Bounded-concurrency batch execution.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Results of a batched run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<R> {
    /// One result per attempted item, in submission order.
    pub results: Vec<R>,
    /// Number of batches submitted.
    pub batches: usize,
    /// Items never submitted because the run was halted.
    pub unattempted: usize,
}

/// Runs work items in fixed-size batches.
///
/// Items inside a batch run concurrently on the calling task; the next batch
/// starts only after the whole batch has finished and the inter-batch pause
/// has elapsed.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    batch_size: usize,
    pause: Duration,
}

impl BatchRunner {
    /// Creates a runner. A batch size of zero is treated as one.
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
        }
    }

    /// Items per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs `work` over `items`.
    ///
    /// `halted` is checked before each batch; once it returns true no further
    /// batches are submitted.
    pub async fn run<I, R, F, Fut, H>(&self, items: Vec<I>, halted: H, work: F) -> BatchReport<R>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = R>,
        H: Fn() -> bool,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut batches = 0;
        let mut pending = items.into_iter().peekable();

        while pending.peek().is_some() {
            if halted() {
                debug!(batches, remaining = total - results.len(), "Batch run halted");
                break;
            }
            if batches > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let batch: Vec<I> = pending.by_ref().take(self.batch_size).collect();
            debug!(batch = batches + 1, size = batch.len(), "Submitting batch");
            results.extend(join_all(batch.into_iter().map(&work)).await);
            batches += 1;
        }

        BatchReport {
            unattempted: total - results.len(),
            results,
            batches,
        }
    }
}
