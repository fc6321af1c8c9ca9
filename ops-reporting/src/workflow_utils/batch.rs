//! Settle-all batch execution for the reporter fan-out

use anyhow::{anyhow, Result};
use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Context provided to each task in a batch
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    /// Phase number (for logging)
    pub phase: usize,
    /// Task number (1-indexed for display)
    pub task_number: usize,
    /// Total number of tasks in this batch
    pub total_tasks: usize,
}

/// Result of one batch item once it has settled
#[derive(Debug)]
pub struct Settled<R> {
    pub context: TaskContext,
    pub result: Result<R>,
}

/// Every item of a batch, in input order
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub settled: Vec<Settled<R>>,
}

impl<R> BatchOutcome<R> {
    pub fn total(&self) -> usize {
        self.settled.len()
    }

    pub fn succeeded(&self) -> usize {
        self.settled.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }
}

/// Aborts the spawned item when the batch future is dropped mid-flight
struct AbortOnDrop<R>(JoinHandle<R>);

impl<R> Drop for AbortOnDrop<R> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Execute every item concurrently and wait until all of them have settled
///
/// # Arguments
/// - `phase`: Phase number for context
/// - `items`: Items to process
/// - `max_concurrency`: Optional bound on simultaneously running items;
///   `None` or `Some(0)` runs all at once
/// - `task_executor`: Function that processes each item, receives (item, context)
///
/// # Returns
/// One [`Settled`] per item, in input order.
///
/// # Error Handling
/// Never fails fast. Each item runs as its own spawned task, so an error or a
/// panic in one item neither cancels nor delays its siblings; it is captured
/// as that item's `Err` result. Dropping the returned future aborts every
/// item still running.
///
/// # Example
/// ```rust,no_run
/// # use ops_reporting::workflow_utils::execute_batch_settled;
/// # async fn example() {
/// let outcome = execute_batch_settled(1, vec![1, 2, 3], None, |item, _ctx| async move {
///     if item == 2 {
///         anyhow::bail!("upstream timeout");
///     }
///     Ok(item * 10)
/// })
/// .await;
///
/// assert_eq!(outcome.succeeded(), 2);
/// assert_eq!(outcome.failed(), 1);
/// # }
/// ```
pub async fn execute_batch_settled<T, F, Fut, R>(
    phase: usize,
    items: Vec<T>,
    max_concurrency: Option<usize>,
    task_executor: F,
) -> BatchOutcome<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let total = items.len();
    let sem = max_concurrency
        .filter(|limit| *limit > 0)
        .map(|limit| Arc::new(Semaphore::new(limit)));
    let executor = Arc::new(task_executor);
    let mut tasks = FuturesUnordered::new();

    for (idx, item) in items.into_iter().enumerate() {
        let sem = sem.clone();
        let executor = executor.clone();

        let ctx = TaskContext {
            phase,
            task_number: idx + 1,
            total_tasks: total,
        };

        let handle = tokio::spawn(async move {
            // Acquire permit (blocks while `max_concurrency` items are running)
            let _permit = match sem {
                Some(sem) => Some(
                    sem.acquire_owned()
                        .await
                        .map_err(|_| anyhow!("Semaphore closed"))?,
                ),
                None => None,
            };

            executor(item, ctx).await
        });

        let mut guard = AbortOnDrop(handle);
        tasks.push(async move { (idx, ctx, (&mut guard.0).await) });
    }

    let mut slots: Vec<Option<Settled<R>>> = (0..total).map(|_| None).collect();
    while let Some((idx, ctx, joined)) = tasks.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow!("task {} panicked", ctx.task_number)),
            Err(e) => Err(anyhow!("task {} was cancelled: {}", ctx.task_number, e)),
        };
        debug!(
            phase = ctx.phase,
            task = ctx.task_number,
            total = ctx.total_tasks,
            ok = result.is_ok(),
            "Batch item settled"
        );
        slots[idx] = Some(Settled {
            context: ctx,
            result,
        });
    }

    BatchOutcome {
        settled: slots.into_iter().flatten().collect(),
    }
}
