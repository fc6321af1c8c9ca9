//! Periodic scheduler for hourly operation reports
//!
//! One check runs as soon as the scheduler starts and again on every interval
//! tick. A tick that arrives while the previous check is still working is
//! dropped, not queued. Inside a check, operations are handled one at a time
//! with a fixed pause between them, and a failure on one operation never stops
//! the others.

use crate::config::SchedulerConfig;
use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Utc};
use ops_reporting_sdk::{Operation, ReportingError, ReportingResult, Workflow};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Observable scheduler state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub is_processing: bool,
}

/// What one check did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    /// Workflows started, in operation order
    pub started: Vec<Uuid>,
    /// Operations skipped because a workflow is already active
    pub skipped: Vec<String>,
    /// Operations whose processing failed
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TickOutcome {
    /// A previous check was still running; nothing was done
    Busy,
    Completed(TickSummary),
}

/// Clears the processing flag however the check exits
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SchedulerInner {
    orchestrator: Orchestrator,
    config: SchedulerConfig,
    running: AtomicBool,
    processing: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
    shutdown: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    check_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Drives periodic workflow creation for every operation with hourly reporting enabled
///
/// Assumes a single scheduler instance per store.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                orchestrator,
                config,
                running: AtomicBool::new(false),
                processing: AtomicBool::new(false),
                next_run: Mutex::new(None),
                shutdown: Notify::new(),
                loop_handle: Mutex::new(None),
                check_handle: Mutex::new(None),
            }),
        }
    }

    /// Start the timer; the first check runs immediately
    ///
    /// Calling it on a running scheduler only logs a warning.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        info!(
            interval_secs = self.inner.config.interval().as_secs(),
            "Scheduler started"
        );

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run().await });
        if let Ok(mut slot) = self.inner.loop_handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the timer and wait for an in-flight check to finish
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("Scheduler not running");
            return;
        }
        self.inner.shutdown.notify_one();

        let loop_handle = self.inner.loop_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = loop_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        let check_handle = self.inner.check_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = check_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler check ended abnormally");
            }
        }

        if let Ok(mut next_run) = self.inner.next_run.lock() {
            *next_run = None;
        }
        info!("Scheduler stopped");
    }

    /// Run one check now, unless one is already in progress
    pub async fn check_and_execute(&self) -> TickOutcome {
        self.inner.check_and_execute().await
    }

    /// Start a workflow for one operation without consulting the active-workflow check
    ///
    /// The store still refuses a second active workflow for the same
    /// operation, which surfaces as [`ReportingError::AlreadyActive`].
    pub async fn trigger_now(&self, operation_id: &str) -> ReportingResult<Uuid> {
        let operation = self
            .inner
            .orchestrator
            .operations()
            .find_operation(operation_id)
            .await?
            .ok_or_else(|| ReportingError::not_found("operation", operation_id))?;

        info!(operation_id = %operation.id, "Manual trigger");
        let workflow = self
            .inner
            .orchestrator
            .start(&operation.id, &format!("Manual ops report - {}", operation.name))
            .await?;
        Ok(workflow.id)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            next_run: self.inner.next_run.lock().ok().and_then(|n| *n),
            is_processing: self.inner.processing.load(Ordering::SeqCst),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>) {
        let period = self.config.interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Ok(mut next_run) = self.next_run.lock() {
                        *next_run = chrono::Duration::from_std(period)
                            .ok()
                            .map(|period| Utc::now() + period);
                    }
                    let inner = self.clone();
                    let handle = tokio::spawn(async move {
                        inner.check_and_execute().await;
                    });
                    if let Ok(mut slot) = self.check_handle.lock() {
                        // Keep tracking an unfinished check; this tick only reports busy
                        if slot.as_ref().map_or(true, |prev| prev.is_finished()) {
                            *slot = Some(handle);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!("Scheduler loop exiting");
                    break;
                }
            }
        }
    }

    async fn check_and_execute(&self) -> TickOutcome {
        if self.processing.swap(true, Ordering::SeqCst) {
            info!("Previous check still running, skipping this tick");
            return TickOutcome::Busy;
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut summary = TickSummary::default();
        let operations = match self
            .orchestrator
            .operations()
            .list_operations_with_reporting_enabled()
            .await
        {
            Ok(operations) => operations,
            Err(e) => {
                error!(error = %e, "Failed to list operations with reporting enabled");
                return TickOutcome::Completed(summary);
            }
        };
        debug!(count = operations.len(), "Checking operations");

        let delay = self.config.operation_delay();
        for (index, operation) in operations.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            match self.process_operation(operation).await {
                Ok(Some(workflow)) => summary.started.push(workflow.id),
                Ok(None) => summary.skipped.push(operation.id.clone()),
                Err(e) => {
                    error!(operation_id = %operation.id, error = %e, "Failed to process operation");
                    summary.failed.push(operation.id.clone());
                }
            }
        }

        info!(
            started = summary.started.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Scheduler check finished"
        );
        TickOutcome::Completed(summary)
    }

    /// Start a workflow unless one is already active; `None` means skipped
    async fn process_operation(&self, operation: &Operation) -> ReportingResult<Option<Workflow>> {
        let workflow_type = self.orchestrator.workflow_type();
        if let Some(active) = self
            .orchestrator
            .store()
            .find_active_workflow(&operation.id, workflow_type)
            .await?
        {
            info!(
                operation_id = %operation.id,
                workflow_id = %active.id,
                status = %active.status,
                "Active workflow exists, skipping"
            );
            return Ok(None);
        }

        let name = format!("Hourly ops report - {}", operation.name);
        match self.orchestrator.start(&operation.id, &name).await {
            Ok(workflow) => Ok(Some(workflow)),
            // Lost a race with a manual trigger
            Err(ReportingError::AlreadyActive { .. }) => {
                info!(
                    operation_id = %operation.id,
                    "Workflow became active concurrently, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
