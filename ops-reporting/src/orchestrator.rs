//! Workflow orchestration: fan-out to reporters, barrier, synthesis
//!
//! [`Orchestrator::start`] persists a workflow with one task per reporter plus
//! a final synthesis task, then hands execution to a background task and
//! returns immediately. [`Orchestrator::process`] drives the run:
//!
//! 1. mark the workflow running
//! 2. run every reporter concurrently and wait for all of them to settle
//! 3. record progress `round(succeeded / total * 80)`
//! 4. fail the workflow if no reporter succeeded, otherwise run synthesis
//! 5. mark the workflow completed at 100%
//!
//! Any error ends the workflow as failed with a single error log entry.

use crate::config::{AgentRoster, OrchestratorConfig};
use crate::task_registry::TaskRegistry;
use crate::workflow_utils::{execute_batch_settled, panic_message, run_task};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use futures::FutureExt;
use ops_reporting_sdk::{
    LogEntry, LogLevel, NewTask, NewWorkflow, OperationRegistry, ReporterExecutor,
    ReporterTaskInput, ReportingError, ReportingResult, SynthesisTaskInput, Synthesizer, Task,
    TaskPatch, TaskType, Workflow, WorkflowPatch, WorkflowStatus, WorkflowStore,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Share of the progress bar owned by the reporter phase
pub const FAN_OUT_PROGRESS: f64 = 80.0;

/// Progress after the fan-out: `round(succeeded / total * 80)`
pub fn fan_out_progress(succeeded: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((succeeded as f64 / total as f64) * FAN_OUT_PROGRESS).round() as u8
}

/// Start of the hour containing `at`
pub fn reporting_period(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
}

fn to_json<T: Serialize>(value: &T) -> ReportingResult<Value> {
    serde_json::to_value(value).map_err(|e| ReportingError::Store(e.into()))
}

fn from_json<T: DeserializeOwned>(value: &Value) -> ReportingResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| ReportingError::Store(e.into()))
}

/// Creates and runs fan-out/synthesis workflows
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn WorkflowStore>,
    operations: Arc<dyn OperationRegistry>,
    reporter: Arc<dyn ReporterExecutor>,
    synthesizer: Arc<dyn Synthesizer>,
    roster: Arc<AgentRoster>,
    config: OrchestratorConfig,
    registry: TaskRegistry,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        operations: Arc<dyn OperationRegistry>,
        reporter: Arc<dyn ReporterExecutor>,
        synthesizer: Arc<dyn Synthesizer>,
        roster: Arc<AgentRoster>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            operations,
            reporter,
            synthesizer,
            roster,
            config,
            registry: TaskRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn operations(&self) -> &Arc<dyn OperationRegistry> {
        &self.operations
    }

    pub fn workflow_type(&self) -> &str {
        &self.config.workflow_type
    }

    /// Create a workflow for `operation_id` and launch it in the background
    ///
    /// Returns the persisted workflow while it is still `pending`. Fails with
    /// `NotFound` for an unknown operation, `Configuration` when the roster
    /// lacks reporters or a manager, and `AlreadyActive` when the operation
    /// already has a pending or running workflow of this type.
    pub async fn start(&self, operation_id: &str, name: &str) -> ReportingResult<Workflow> {
        let operation = self
            .operations
            .find_operation(operation_id)
            .await?
            .ok_or_else(|| ReportingError::not_found("operation", operation_id))?;

        let reporters = self.roster.reporters();
        if reporters.is_empty() {
            return Err(ReportingError::Configuration(
                "no reporter agents configured".to_string(),
            ));
        }
        let manager = self.roster.manager().ok_or_else(|| {
            ReportingError::Configuration("no manager agent configured".to_string())
        })?;

        let period = reporting_period(Utc::now());
        let workflow = self
            .store
            .create_workflow(NewWorkflow {
                name: name.to_string(),
                workflow_type: self.config.workflow_type.clone(),
                operation_id: operation.id.clone(),
                metadata: json!({
                    "operation_name": operation.name,
                    "reporting_period": period,
                    "planned_reporters": reporters.len(),
                }),
            })
            .await?;

        let mut specs = Vec::with_capacity(reporters.len() + 1);
        for (index, agent) in reporters.iter().enumerate() {
            specs.push(NewTask {
                agent_id: agent.id.clone(),
                task_type: TaskType::Report,
                task_name: format!("{} report", agent.name),
                sequence_order: index as u32 + 1,
                input_data: to_json(&ReporterTaskInput {
                    operation_id: operation.id.clone(),
                    reporting_period: period,
                    page_role: agent.page_role,
                })?,
            });
        }
        specs.push(NewTask {
            agent_id: manager.id.clone(),
            task_type: TaskType::Synthesis,
            task_name: "Synthesize operations digest".to_string(),
            sequence_order: reporters.len() as u32 + 1,
            input_data: to_json(&SynthesisTaskInput {
                operation_id: operation.id.clone(),
                reporting_period: period,
                reporter_task_ids: Vec::new(),
            })?,
        });

        // The workflow row already holds the active slot; release it if the
        // task graph cannot be written
        if let Err(e) = self.create_task_graph(&workflow, specs, period).await {
            self.mark_failed(workflow.id, &format!("Workflow setup failed: {}", e)).await;
            return Err(e);
        }

        self.log(
            workflow.id,
            LogLevel::Info,
            "Workflow created",
            json!({
                "operation_id": operation.id,
                "reporting_period": period,
                "reporters": reporters.len(),
            }),
        )
        .await;

        let runner = self.clone();
        let workflow_id = workflow.id;
        let handle = tokio::spawn(async move {
            runner.process(workflow_id).await;
        });
        self.registry.register(workflow_id, handle).await;

        Ok(workflow)
    }

    async fn create_task_graph(
        &self,
        workflow: &Workflow,
        specs: Vec<NewTask>,
        period: DateTime<Utc>,
    ) -> ReportingResult<()> {
        let mut tasks = self.store.create_tasks(workflow.id, specs).await?;
        let synthesis = tasks
            .pop()
            .ok_or_else(|| ReportingError::Configuration("workflow has no tasks".to_string()))?;
        let reporter_task_ids = tasks.iter().map(|task| task.id).collect();

        self.store
            .update_task(
                synthesis.id,
                TaskPatch::input(to_json(&SynthesisTaskInput {
                    operation_id: workflow.operation_id.clone(),
                    reporting_period: period,
                    reporter_task_ids,
                })?),
            )
            .await?;
        Ok(())
    }

    /// Run a persisted workflow to a terminal status
    ///
    /// Never returns an error and never unwinds: every failure, including a
    /// panic, is recorded on the workflow.
    pub async fn process(&self, workflow_id: Uuid) {
        match AssertUnwindSafe(self.execute(workflow_id)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.mark_failed(workflow_id, &format!("Workflow failed: {}", e)).await,
            Err(payload) => {
                let message = format!(
                    "Workflow failed: execution panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.mark_failed(workflow_id, &message).await
            }
        }
    }

    async fn execute(&self, workflow_id: Uuid) -> ReportingResult<()> {
        self.store
            .update_workflow(
                workflow_id,
                WorkflowPatch::status(WorkflowStatus::Running).with_started_at(Utc::now()),
            )
            .await?;
        self.log(workflow_id, LogLevel::Info, "Execution started", Value::Null).await;

        let mut tasks = self.store.list_tasks(workflow_id).await?;
        let synthesis_task = match tasks.pop() {
            Some(task) if task.task_type == TaskType::Synthesis => task,
            _ => {
                return Err(ReportingError::Configuration(
                    "workflow has no synthesis task".to_string(),
                ))
            }
        };
        let reporter_tasks = tasks;
        let total = reporter_tasks.len();

        let succeeded = self.run_reporters(workflow_id, reporter_tasks).await;

        self.store
            .update_workflow(
                workflow_id,
                WorkflowPatch::progress(fan_out_progress(succeeded, total)),
            )
            .await?;

        if succeeded == 0 {
            return Err(ReportingError::AggregateFailure { total });
        }

        self.run_synthesis(&synthesis_task).await?;

        self.store
            .update_workflow(
                workflow_id,
                WorkflowPatch::status(WorkflowStatus::Completed)
                    .with_progress(100)
                    .with_completed_at(Utc::now()),
            )
            .await?;
        self.log(
            workflow_id,
            LogLevel::Info,
            "Workflow completed successfully",
            Value::Null,
        )
        .await;
        Ok(())
    }

    /// Fan out to every reporter and wait for all of them; returns the success count
    async fn run_reporters(&self, workflow_id: Uuid, tasks: Vec<Task>) -> usize {
        let total = tasks.len();
        let store = self.store.clone();
        let reporter = self.reporter.clone();
        let deadline = self.config.worker_timeout();

        let outcome = execute_batch_settled(
            1,
            tasks,
            self.config.max_concurrency(),
            move |task: Task, _ctx| {
                let store = store.clone();
                let reporter = reporter.clone();
                async move {
                    let agent_id = task.agent_id.clone();
                    let input_data = task.input_data.clone();
                    run_task(store.as_ref(), &task, deadline, move || async move {
                        let input: ReporterTaskInput = from_json(&input_data)?;
                        let summary = reporter
                            .execute(&agent_id, &input.operation_id, input.reporting_period)
                            .await?;
                        to_json(&summary)
                    })
                    .await
                    .map_err(anyhow::Error::from)
                }
            },
        )
        .await;

        let succeeded = outcome.succeeded();
        let failed = outcome.failed();
        let message = format!("Reporter phase finished: {}/{} succeeded", succeeded, total);
        let level = if failed > 0 {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };

        let failures: Vec<Value> = outcome
            .settled
            .iter()
            .filter_map(|settled| settled.result.as_ref().err().map(|e| e.to_string()))
            .map(Value::String)
            .collect();
        self.log(
            workflow_id,
            level,
            &message,
            json!({
                "succeeded": succeeded,
                "failed": failed,
                "total": total,
                "errors": failures,
            }),
        )
        .await;

        succeeded
    }

    async fn run_synthesis(&self, task: &Task) -> ReportingResult<Value> {
        let synthesizer = self.synthesizer.clone();
        run_task(
            self.store.as_ref(),
            task,
            self.config.synthesis_timeout(),
            move || async move {
                let input: SynthesisTaskInput = from_json(&task.input_data)?;
                let output = synthesizer
                    .synthesize(&input.operation_id, &input.reporter_task_ids)
                    .await?;
                to_json(&output)
            },
        )
        .await
    }

    /// Terminal failure: status, completion time and one error log entry
    async fn mark_failed(&self, workflow_id: Uuid, message: &str) {
        if let Err(e) = self
            .store
            .update_workflow(
                workflow_id,
                WorkflowPatch::status(WorkflowStatus::Failed).with_completed_at(Utc::now()),
            )
            .await
        {
            error!(workflow_id = %workflow_id, error = %e, "Failed to mark workflow as failed");
        }
        self.log(workflow_id, LogLevel::Error, message, Value::Null).await;
    }

    /// Append to the workflow's audit log and emit the same event through
    /// `tracing`; a failed write is traced, not raised
    async fn log(&self, workflow_id: Uuid, level: LogLevel, message: &str, context: Value) {
        match level {
            LogLevel::Info => info!(workflow_id = %workflow_id, context = %context, "{}", message),
            LogLevel::Warning => {
                warn!(workflow_id = %workflow_id, context = %context, "{}", message)
            }
            LogLevel::Error => {
                error!(workflow_id = %workflow_id, context = %context, "{}", message)
            }
        }

        let context = (!context.is_null()).then_some(context);
        if let Err(e) = self
            .store
            .append_log(workflow_id, level, message, context)
            .await
        {
            error!(workflow_id = %workflow_id, error = %e, "Failed to append workflow log");
        }
    }

    /// Wait for a workflow started by this orchestrator to finish
    pub async fn wait_for(&self, workflow_id: &Uuid) -> bool {
        self.registry.wait(workflow_id).await
    }

    /// Wait up to `grace` for background runs, then abort the rest
    ///
    /// Returns the number of aborted runs. Their workflows keep their last
    /// persisted status until recovered.
    pub async fn drain_or_abort(&self, grace: Duration) -> usize {
        let active = self.registry.active_count().await;
        if active > 0 {
            info!(active, grace_secs = grace.as_secs(), "Waiting for workflow runs");
        }
        self.registry.drain_within(grace).await
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> ReportingResult<Option<Workflow>> {
        self.store.get_workflow(workflow_id).await
    }

    pub async fn workflows_for(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> ReportingResult<Vec<Workflow>> {
        self.store.list_workflows(operation_id, limit).await
    }

    pub async fn tasks_for(&self, workflow_id: Uuid) -> ReportingResult<Vec<Task>> {
        self.store.list_tasks(workflow_id).await
    }

    pub async fn logs_for(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> ReportingResult<Vec<LogEntry>> {
        self.store.list_logs(workflow_id, limit).await
    }
}
