//! Task registry for background workflow runs
//!
//! `Orchestrator::start` spawns each workflow's execution without awaiting it.
//! The registry keeps every `JoinHandle`, so callers can wait for one run, wait
//! for all of them on shutdown, or abort the ones that outlive a grace period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Registry of spawned workflow runs keyed by workflow id
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a spawned run, dropping handles of runs that already finished
    pub async fn register(&self, workflow_id: Uuid, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.insert(workflow_id, handle);
    }

    /// Wait for one run to finish; returns false if it is not registered
    pub async fn wait(&self, workflow_id: &Uuid) -> bool {
        let handle = self.tasks.lock().await.remove(workflow_id);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(workflow_id = %workflow_id, error = %e, "Workflow run ended abnormally");
                }
                true
            }
            None => false,
        }
    }

    /// Wait for every registered run until `grace` elapses, then abort the
    /// stragglers; returns how many were aborted
    pub async fn drain_within(&self, grace: Duration) -> usize {
        let handles: Vec<(Uuid, JoinHandle<()>)> = self.tasks.lock().await.drain().collect();
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for (workflow_id, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(workflow_id = %workflow_id, error = %e, "Workflow run ended abnormally");
                }
                Err(_) => {
                    warn!(workflow_id = %workflow_id, "Aborting workflow run after shutdown grace");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }

    /// Runs that have not finished yet
    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Clone for TaskRegistry {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
