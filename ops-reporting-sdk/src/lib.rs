//! Shared data model and collaborator traits for the operations reporting orchestrator
//!
//! The orchestrator crate depends only on the traits defined here, so stores,
//! reporters and synthesizers can be swapped (SQLite in production, scripted
//! mocks in tests).

pub mod error;

pub use error::{ReportingError, ReportingResult};

// Re-export async trait for implementors
pub use async_trait::async_trait;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Pending and running workflows count as active
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(format!("Unknown workflow status: {}", other)),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status: pending -> in_progress -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Fan-out page reporter call
    Report,
    /// The single dependent synthesis call
    Synthesis,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Report => "report",
            TaskType::Synthesis => "synthesis",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(TaskType::Report),
            "synthesis" => Ok(TaskType::Synthesis),
            other => Err(format!("Unknown task type: {}", other)),
        }
    }
}

/// Severity of a persisted workflow log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

/// One scheduled or triggered run of the reporting protocol for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub workflow_type: String,
    pub operation_id: String,
    pub status: WorkflowStatus,
    /// 0-100, never decreases within a run
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// Fields supplied when inserting a workflow; the store assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub workflow_type: String,
    pub operation_id: String,
    pub metadata: Value,
}

/// Partial update of a workflow row
#[derive(Debug, Clone, Default)]
pub struct WorkflowPatch {
    pub status: Option<WorkflowStatus>,
    pub progress: Option<u8>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowPatch {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Apply the patch; progress is clamped to 100 and never moves backwards
    pub fn apply(&self, workflow: &mut Workflow) {
        if let Some(status) = self.status {
            workflow.status = status;
        }
        if let Some(progress) = self.progress {
            workflow.progress = workflow.progress.max(progress.min(100));
        }
        if let Some(at) = self.started_at {
            workflow.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            workflow.completed_at = Some(at);
        }
    }
}

/// One unit of work within a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub agent_id: String,
    pub task_type: TaskType,
    pub task_name: String,
    /// 1..N for reporters, N+1 for synthesis; unique per workflow
    pub sequence_order: u32,
    pub status: TaskStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when inserting a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub agent_id: String,
    pub task_type: TaskType,
    pub task_name: String,
    pub sequence_order: u32,
    pub input_data: Value,
}

/// Partial update of a task row
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn in_progress(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            started_at: Some(at),
            ..Default::default()
        }
    }

    pub fn completed(output: Value, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            output_data: Some(output),
            completed_at: Some(at),
            ..Default::default()
        }
    }

    pub fn failed(error_message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error_message: Some(error_message.into()),
            completed_at: Some(at),
            ..Default::default()
        }
    }

    pub fn input(input_data: Value) -> Self {
        Self {
            input_data: Some(input_data),
            ..Default::default()
        }
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(input) = &self.input_data {
            task.input_data = input.clone();
        }
        if let Some(output) = &self.output_data {
            task.output_data = Some(output.clone());
        }
        if let Some(message) = &self.error_message {
            task.error_message = Some(message.clone());
        }
        if let Some(at) = self.started_at {
            task.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            task.completed_at = Some(at);
        }
    }
}

/// Input handed to a reporter task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterTaskInput {
    pub operation_id: String,
    pub reporting_period: DateTime<Utc>,
    pub page_role: Option<PageRole>,
}

/// Input handed to the synthesis task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisTaskInput {
    pub operation_id: String,
    pub reporting_period: DateTime<Utc>,
    /// Ids of every reporter task in the same workflow
    pub reporter_task_ids: Vec<Uuid>,
}

/// Append-only orchestration audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub workflow_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

/// Business entity a workflow is scoped to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub name: String,
    pub hourly_reporting_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Role an agent plays in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Fan-out page reporter
    Reporter,
    /// Synthesis worker
    Manager,
}

/// Domain page a reporter observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRole {
    Dashboard,
    Targets,
    Vulnerabilities,
    Workflows,
    Agents,
    Reports,
}

impl PageRole {
    pub const ALL: [PageRole; 6] = [
        PageRole::Dashboard,
        PageRole::Targets,
        PageRole::Vulnerabilities,
        PageRole::Workflows,
        PageRole::Agents,
        PageRole::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageRole::Dashboard => "dashboard",
            PageRole::Targets => "targets",
            PageRole::Vulnerabilities => "vulnerabilities",
            PageRole::Workflows => "workflows",
            PageRole::Agents => "agents",
            PageRole::Reports => "reports",
        }
    }
}

impl FromStr for PageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("Unknown page role: {}", s))
    }
}

impl fmt::Display for PageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker known to the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_role: Option<PageRole>,
}

/// One detected difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    /// No baseline existed for this agent and operation
    FirstReport { fields: usize },
    /// A `*_count` field moved
    CountDelta {
        field: String,
        previous: f64,
        current: f64,
        delta: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub field: String,
    pub value: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub change_count: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub health_score: u8,
    pub snapshot_fields: usize,
}

/// Structured output of one page reporter for one reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub agent_id: String,
    pub operation_id: String,
    pub page_role: PageRole,
    pub reporting_period: DateTime<Utc>,
    pub snapshot: Value,
    pub changes: Vec<Change>,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<Recommendation>,
    pub metrics: ReportMetrics,
    pub created_at: DateTime<Utc>,
}

/// Small summary stored as reporter task output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: Uuid,
    pub page_role: PageRole,
    pub changes: usize,
    pub issues: usize,
    pub recommendations: usize,
    pub health_score: u8,
}

impl From<&Report> for ReportSummary {
    fn from(report: &Report) -> Self {
        Self {
            report_id: report.id,
            page_role: report.page_role,
            changes: report.changes.len(),
            issues: report.issues.len(),
            recommendations: report.recommendations.len(),
            health_score: report.metrics.health_score,
        }
    }
}

/// Overall verdict of a synthesis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Stable,
    Attention,
    Critical,
}

/// Decision artifact produced by the synthesis worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub decision: Decision,
    pub summary: String,
    pub priorities: Vec<Recommendation>,
    pub reports_considered: usize,
    pub reporters_missing: usize,
    pub health_score: u8,
}

/// Persistence for workflows, tasks and their audit log
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, spec: NewWorkflow) -> ReportingResult<Workflow>;

    /// Insert every task of a workflow at once and return them with generated ids
    async fn create_tasks(&self, workflow_id: Uuid, specs: Vec<NewTask>)
        -> ReportingResult<Vec<Task>>;

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> ReportingResult<Task>;

    async fn update_workflow(&self, id: Uuid, patch: WorkflowPatch) -> ReportingResult<Workflow>;

    /// Any pending or running workflow for the key
    async fn find_active_workflow(
        &self,
        operation_id: &str,
        workflow_type: &str,
    ) -> ReportingResult<Option<Workflow>>;

    async fn append_log(
        &self,
        workflow_id: Uuid,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
    ) -> ReportingResult<()>;

    async fn get_workflow(&self, id: Uuid) -> ReportingResult<Option<Workflow>>;

    /// Most recent first
    async fn list_workflows(&self, operation_id: &str, limit: usize)
        -> ReportingResult<Vec<Workflow>>;

    async fn get_task(&self, id: Uuid) -> ReportingResult<Option<Task>>;

    /// Ordered by `sequence_order`
    async fn list_tasks(&self, workflow_id: Uuid) -> ReportingResult<Vec<Task>>;

    /// Oldest first
    async fn list_logs(&self, workflow_id: Uuid, limit: Option<usize>)
        -> ReportingResult<Vec<LogEntry>>;
}

/// Lookup of the business operations workflows are scoped to
#[async_trait]
pub trait OperationRegistry: Send + Sync {
    async fn find_operation(&self, id: &str) -> ReportingResult<Option<Operation>>;

    async fn list_operations_with_reporting_enabled(&self) -> ReportingResult<Vec<Operation>>;
}

/// Persistence for reporter output
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn latest_report(
        &self,
        agent_id: &str,
        operation_id: &str,
    ) -> ReportingResult<Option<Report>>;

    async fn save_report(&self, report: &Report) -> ReportingResult<()>;

    async fn get_report(&self, id: Uuid) -> ReportingResult<Option<Report>>;
}

/// Executes one fan-out reporter assignment
#[async_trait]
pub trait ReporterExecutor: Send + Sync {
    async fn execute(
        &self,
        agent_id: &str,
        operation_id: &str,
        reporting_period: DateTime<Utc>,
    ) -> ReportingResult<ReportSummary>;
}

/// Produces the decision artifact from the reporter outputs of one period
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        operation_id: &str,
        reporter_task_ids: &[Uuid],
    ) -> ReportingResult<SynthesisOutput>;
}
