//! Task execution with persisted state transitions

use chrono::Utc;
use futures::FutureExt;
use ops_reporting_sdk::{ReportingError, ReportingResult, Task, TaskPatch, WorkflowStore};
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Execute a single workflow task, recording every transition on its row
///
/// Wraps the worker call with:
/// - `in_progress` + `started_at` before execution
/// - `completed` + `output_data` + `completed_at` on success
/// - `failed` + `error_message` + `completed_at` on error
///
/// The worker error is returned unchanged so callers can count or react to it.
/// With a `deadline`, a worker that does not finish in time fails with
/// [`ReportingError::WorkerTimeout`]. A panicking worker fails the task with
/// [`ReportingError::WorkerFailure`] instead of unwinding into the caller.
///
/// # Example
/// ```rust,no_run
/// # use ops_reporting::workflow_utils::run_task;
/// # use ops_reporting_sdk::{Task, WorkflowStore};
/// # async fn example(store: &dyn WorkflowStore, task: &Task) -> anyhow::Result<()> {
/// let output = run_task(store, task, Some(std::time::Duration::from_secs(30)), || async {
///     Ok(serde_json::json!({ "report_id": "..." }))
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_task<F, Fut>(
    store: &dyn WorkflowStore,
    task: &Task,
    deadline: Option<Duration>,
    worker: F,
) -> ReportingResult<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ReportingResult<Value>>,
{
    store
        .update_task(task.id, TaskPatch::in_progress(Utc::now()))
        .await?;
    debug!(task_id = %task.id, agent_id = %task.agent_id, "Task started");

    let guarded = AssertUnwindSafe(async move { worker().await }).catch_unwind();
    let settled = match deadline {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(settled) => settled,
            Err(_) => Ok(Err(ReportingError::WorkerTimeout {
                agent_id: task.agent_id.clone(),
                timeout_ms: limit.as_millis() as u64,
            })),
        },
        None => guarded.await,
    };
    let outcome = settled.unwrap_or_else(|payload| {
        Err(ReportingError::worker(format!(
            "worker {} panicked: {}",
            task.agent_id,
            panic_message(payload.as_ref())
        )))
    });

    match outcome {
        Ok(output) => {
            store
                .update_task(task.id, TaskPatch::completed(output.clone(), Utc::now()))
                .await?;
            debug!(task_id = %task.id, agent_id = %task.agent_id, "Task completed");
            Ok(output)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(store_err) = store
                .update_task(task.id, TaskPatch::failed(message.clone(), Utc::now()))
                .await
            {
                error!(task_id = %task.id, error = %store_err, "Failed to record task failure");
            }
            warn!(task_id = %task.id, agent_id = %task.agent_id, error = %message, "Task failed");
            Err(e)
        }
    }
}

/// Text of a panic payload, when it carries one
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
