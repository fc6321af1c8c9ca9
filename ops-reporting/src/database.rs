//! SQLite persistence for workflows, tasks, logs, operations and reports
//!
//! [`Database`] implements every storage trait the orchestrator consumes
//! ([`WorkflowStore`], [`OperationRegistry`], [`ReportStore`]), so a single
//! file backs a whole deployment.
//!
//! # Database Schema
//!
//! 1. **operations** - Business operations and their reporting flag
//! 2. **workflows** - One row per reporting run
//! 3. **workflow_tasks** - Reporter and synthesis tasks, unique per (workflow, sequence)
//! 4. **workflow_logs** - Append-only orchestration audit trail
//! 5. **reports** - Reporter output (snapshot, changes, issues, recommendations, metrics)
//! 6. **schema_version** - Database schema version for migrations
//!
//! # Active workflow exclusion
//!
//! A partial unique index allows at most one `pending`/`running` workflow per
//! `(operation_id, workflow_type)`. A competing insert is rejected and surfaces
//! as [`ReportingError::AlreadyActive`] instead of creating a duplicate run.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ops_reporting::database::Database;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::new("/var/lib/ops-reporting/reporting.db".into())?;
//! db.initialize_schema()?;
//! db.upsert_operation("op-7", "Operation Seven", true)?;
//! let enabled = db.list_operations(true)?;
//! assert_eq!(enabled.len(), 1);
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ops_reporting_sdk::{
    LogEntry, LogLevel, NewTask, NewWorkflow, Operation, OperationRegistry, Report,
    ReportStore, ReportingError, ReportingResult, Task, TaskPatch, TaskStatus, Workflow,
    WorkflowPatch, WorkflowStatus, WorkflowStore,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const WORKFLOW_COLUMNS: &str = "id, name, workflow_type, operation_id, status, progress, \
     created_at, started_at, completed_at, metadata";

const TASK_COLUMNS: &str = "id, workflow_id, agent_id, task_type, task_name, sequence_order, \
     status, input_data, output_data, error_message, created_at, started_at, completed_at";

const REPORT_COLUMNS: &str = "id, agent_id, operation_id, page_role, reporting_period, snapshot, \
     changes, issues, recommendations, metrics, created_at";

/// Database wrapper shared by the orchestrator, scheduler and reporters
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection at the specified path
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Initialize database schema with all tables and indexes
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                hourly_reporting_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                workflow_type TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                metadata TEXT NOT NULL DEFAULT 'null'
            );

            CREATE INDEX IF NOT EXISTS idx_workflows_operation
            ON workflows(operation_id, created_at DESC);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_single_active
            ON workflows(operation_id, workflow_type)
            WHERE status IN ('pending', 'running');

            CREATE TABLE IF NOT EXISTS workflow_tasks (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                task_name TEXT NOT NULL,
                sequence_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                input_data TEXT NOT NULL,
                output_data TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,

                FOREIGN KEY(workflow_id) REFERENCES workflows(id) ON DELETE CASCADE,
                UNIQUE(workflow_id, sequence_order)
            );

            CREATE TABLE IF NOT EXISTS workflow_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                context TEXT NOT NULL DEFAULT 'null',
                timestamp TEXT NOT NULL,

                FOREIGN KEY(workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_logs_workflow_id ON workflow_logs(workflow_id, id);

            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                page_role TEXT NOT NULL,
                reporting_period TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                changes TEXT NOT NULL,
                issues TEXT NOT NULL,
                recommendations TEXT NOT NULL,
                metrics TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_agent_operation
            ON reports(agent_id, operation_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )?;

        Ok(())
    }

    /// Get current schema version
    pub fn get_schema_version(&self) -> Result<i32> {
        let version: i32 = self.conn()?.query_row(
            "SELECT MAX(version) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Insert or rename an operation and set its reporting flag
    pub fn upsert_operation(&self, id: &str, name: &str, enabled: bool) -> Result<Operation> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO operations (id, name, hourly_reporting_enabled, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                hourly_reporting_enabled = excluded.hourly_reporting_enabled
            "#,
            params![id, name, enabled, timestamp(&Utc::now())],
        )?;

        conn.query_row(
            "SELECT id, name, hourly_reporting_enabled, created_at FROM operations WHERE id = ?1",
            params![id],
            map_operation_row,
        )
        .map_err(Into::into)
    }

    /// Toggle hourly reporting; returns false when the operation is unknown
    pub fn set_reporting_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE operations SET hourly_reporting_enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }

    pub fn fetch_operation(&self, id: &str) -> Result<Option<Operation>> {
        let operation = self
            .conn()?
            .query_row(
                r#"
                SELECT id, name, hourly_reporting_enabled, created_at
                FROM operations
                WHERE id = ?1
                "#,
                params![id],
                map_operation_row,
            )
            .optional()?;
        Ok(operation)
    }

    /// List operations, optionally only those with reporting enabled
    pub fn list_operations(&self, enabled_only: bool) -> Result<Vec<Operation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, hourly_reporting_enabled, created_at
            FROM operations
            WHERE (?1 = 0 OR hourly_reporting_enabled = 1)
            ORDER BY id ASC
            "#,
        )?;

        let operations = stmt
            .query_map(params![enabled_only], map_operation_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(operations)
    }

    // ── Workflows ────────────────────────────────────────────────────

    /// Insert a pending workflow
    ///
    /// Returns `None` when another active workflow already holds the
    /// `(operation_id, workflow_type)` slot.
    pub fn insert_workflow(&self, spec: &NewWorkflow) -> Result<Option<Workflow>> {
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            workflow_type: spec.workflow_type.clone(),
            operation_id: spec.operation_id.clone(),
            status: WorkflowStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: spec.metadata.clone(),
        };

        let result = self.conn()?.execute(
            r#"
            INSERT INTO workflows (
                id, name, workflow_type, operation_id, status, progress,
                created_at, started_at, completed_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8)
            "#,
            params![
                workflow.id.to_string(),
                workflow.name,
                workflow.workflow_type,
                workflow.operation_id,
                workflow.status.as_str(),
                workflow.progress,
                timestamp(&workflow.created_at),
                serde_json::to_string(&workflow.metadata)?,
            ],
        );

        match result {
            Ok(_) => Ok(Some(workflow)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn fetch_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        let workflow = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM workflows WHERE id = ?1", WORKFLOW_COLUMNS),
                params![id.to_string()],
                map_workflow_row,
            )
            .optional()?;
        Ok(workflow)
    }

    /// Read-modify-write a workflow inside one transaction
    pub fn patch_workflow(&self, id: &Uuid, patch: &WorkflowPatch) -> Result<Option<Workflow>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = tx
            .query_row(
                &format!("SELECT {} FROM workflows WHERE id = ?1", WORKFLOW_COLUMNS),
                params![id.to_string()],
                map_workflow_row,
            )
            .optional()?;

        let Some(mut workflow) = current else {
            return Ok(None);
        };
        patch.apply(&mut workflow);

        tx.execute(
            r#"
            UPDATE workflows
            SET status = ?1, progress = ?2, started_at = ?3, completed_at = ?4
            WHERE id = ?5
            "#,
            params![
                workflow.status.as_str(),
                workflow.progress,
                workflow.started_at.as_ref().map(timestamp),
                workflow.completed_at.as_ref().map(timestamp),
                id.to_string(),
            ],
        )?;
        tx.commit()?;

        Ok(Some(workflow))
    }

    /// Most recent pending or running workflow for the key
    pub fn active_workflow(
        &self,
        operation_id: &str,
        workflow_type: &str,
    ) -> Result<Option<Workflow>> {
        let workflow = self
            .conn()?
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM workflows
                    WHERE operation_id = ?1 AND workflow_type = ?2
                      AND status IN ('pending', 'running')
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                    WORKFLOW_COLUMNS
                ),
                params![operation_id, workflow_type],
                map_workflow_row,
            )
            .optional()?;
        Ok(workflow)
    }

    pub fn workflows_for_operation(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> Result<Vec<Workflow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM workflows
            WHERE operation_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
            WORKFLOW_COLUMNS
        ))?;

        let workflows = stmt
            .query_map(params![operation_id, limit], map_workflow_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workflows)
    }

    /// Fail every workflow a previous process left pending or running
    ///
    /// Returns the ids that were failed so callers can report them.
    pub fn fail_interrupted_workflows(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = timestamp(&Utc::now());

        let ids = {
            let mut stmt =
                tx.prepare("SELECT id FROM workflows WHERE status IN ('pending', 'running')")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        for id in &ids {
            tx.execute(
                "UPDATE workflows SET status = 'failed', completed_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            tx.execute(
                r#"
                UPDATE workflow_tasks
                SET status = 'failed', error_message = 'Interrupted before completion',
                    completed_at = ?1
                WHERE workflow_id = ?2 AND status = 'in_progress'
                "#,
                params![now, id],
            )?;
            tx.execute(
                r#"
                INSERT INTO workflow_logs (workflow_id, level, message, context, timestamp)
                VALUES (?1, 'error', 'Workflow interrupted before completion', 'null', ?2)
                "#,
                params![id, now],
            )?;
        }
        tx.commit()?;

        ids.iter()
            .map(|id| Uuid::parse_str(id).map_err(|e| anyhow!("Invalid workflow id {}: {}", id, e)))
            .collect()
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Insert all tasks of a workflow in one transaction
    pub fn insert_tasks(&self, workflow_id: &Uuid, specs: &[NewTask]) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(specs.len());

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO workflow_tasks (
                    id, workflow_id, agent_id, task_type, task_name, sequence_order,
                    status, input_data, output_data, error_message, created_at,
                    started_at, completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, NULL, NULL, ?8, NULL, NULL)
                "#,
            )?;

            for spec in specs {
                let task = Task {
                    id: Uuid::new_v4(),
                    workflow_id: *workflow_id,
                    agent_id: spec.agent_id.clone(),
                    task_type: spec.task_type,
                    task_name: spec.task_name.clone(),
                    sequence_order: spec.sequence_order,
                    status: TaskStatus::Pending,
                    input_data: spec.input_data.clone(),
                    output_data: None,
                    error_message: None,
                    created_at: now,
                    started_at: None,
                    completed_at: None,
                };

                stmt.execute(params![
                    task.id.to_string(),
                    workflow_id.to_string(),
                    task.agent_id,
                    task.task_type.as_str(),
                    task.task_name,
                    task.sequence_order,
                    serde_json::to_string(&task.input_data)?,
                    timestamp(&task.created_at),
                ])?;
                tasks.push(task);
            }
        }

        tx.commit()?;
        Ok(tasks)
    }

    pub fn fetch_task(&self, id: &Uuid) -> Result<Option<Task>> {
        let task = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM workflow_tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.to_string()],
                map_task_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Read-modify-write a task inside one transaction
    pub fn patch_task(&self, id: &Uuid, patch: &TaskPatch) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = tx
            .query_row(
                &format!("SELECT {} FROM workflow_tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.to_string()],
                map_task_row,
            )
            .optional()?;

        let Some(mut task) = current else {
            return Ok(None);
        };
        patch.apply(&mut task);

        tx.execute(
            r#"
            UPDATE workflow_tasks
            SET status = ?1, input_data = ?2, output_data = ?3, error_message = ?4,
                started_at = ?5, completed_at = ?6
            WHERE id = ?7
            "#,
            params![
                task.status.as_str(),
                serde_json::to_string(&task.input_data)?,
                task.output_data
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                task.error_message,
                task.started_at.as_ref().map(timestamp),
                task.completed_at.as_ref().map(timestamp),
                id.to_string(),
            ],
        )?;
        tx.commit()?;

        Ok(Some(task))
    }

    pub fn tasks_for_workflow(&self, workflow_id: &Uuid) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM workflow_tasks WHERE workflow_id = ?1 ORDER BY sequence_order ASC",
            TASK_COLUMNS
        ))?;

        let tasks = stmt
            .query_map(params![workflow_id.to_string()], map_task_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ── Logs ─────────────────────────────────────────────────────────

    pub fn insert_log(
        &self,
        workflow_id: &Uuid,
        level: LogLevel,
        message: &str,
        context: &Value,
    ) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO workflow_logs (workflow_id, level, message, context, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                workflow_id.to_string(),
                level.as_str(),
                message,
                serde_json::to_string(context)?,
                timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Logs for a workflow in insertion order
    pub fn logs_for_workflow(
        &self,
        workflow_id: &Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, workflow_id, level, message, context, timestamp
            FROM workflow_logs
            WHERE workflow_id = ?1
            ORDER BY id ASC
            LIMIT ?2
            "#,
        )?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let logs = stmt
            .query_map(params![workflow_id.to_string(), limit], map_log_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    // ── Reports ──────────────────────────────────────────────────────

    pub fn insert_report(&self, report: &Report) -> Result<()> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO reports ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                REPORT_COLUMNS
            ),
            params![
                report.id.to_string(),
                report.agent_id,
                report.operation_id,
                report.page_role.as_str(),
                timestamp(&report.reporting_period),
                serde_json::to_string(&report.snapshot)?,
                serde_json::to_string(&report.changes)?,
                serde_json::to_string(&report.issues)?,
                serde_json::to_string(&report.recommendations)?,
                serde_json::to_string(&report.metrics)?,
                timestamp(&report.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn fetch_report(&self, id: &Uuid) -> Result<Option<Report>> {
        let report = self
            .conn()?
            .query_row(
                &format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS),
                params![id.to_string()],
                map_report_row,
            )
            .optional()?;
        Ok(report)
    }

    /// Most recent report by this agent for this operation
    pub fn latest_report_for(
        &self,
        agent_id: &str,
        operation_id: &str,
    ) -> Result<Option<Report>> {
        let report = self
            .conn()?
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM reports
                    WHERE agent_id = ?1 AND operation_id = ?2
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT 1
                    "#,
                    REPORT_COLUMNS
                ),
                params![agent_id, operation_id],
                map_report_row,
            )
            .optional()?;
        Ok(report)
    }
}

#[async_trait]
impl WorkflowStore for Database {
    async fn create_workflow(&self, spec: NewWorkflow) -> ReportingResult<Workflow> {
        self.insert_workflow(&spec)?
            .ok_or_else(|| ReportingError::AlreadyActive {
                operation_id: spec.operation_id.clone(),
                workflow_type: spec.workflow_type.clone(),
            })
    }

    async fn create_tasks(
        &self,
        workflow_id: Uuid,
        specs: Vec<NewTask>,
    ) -> ReportingResult<Vec<Task>> {
        Ok(self.insert_tasks(&workflow_id, &specs)?)
    }

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> ReportingResult<Task> {
        self.patch_task(&id, &patch)?
            .ok_or_else(|| ReportingError::not_found("task", id.to_string()))
    }

    async fn update_workflow(&self, id: Uuid, patch: WorkflowPatch) -> ReportingResult<Workflow> {
        self.patch_workflow(&id, &patch)?
            .ok_or_else(|| ReportingError::not_found("workflow", id.to_string()))
    }

    async fn find_active_workflow(
        &self,
        operation_id: &str,
        workflow_type: &str,
    ) -> ReportingResult<Option<Workflow>> {
        Ok(self.active_workflow(operation_id, workflow_type)?)
    }

    async fn append_log(
        &self,
        workflow_id: Uuid,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
    ) -> ReportingResult<()> {
        let context = context.unwrap_or(Value::Null);
        Ok(self.insert_log(&workflow_id, level, message, &context)?)
    }

    async fn get_workflow(&self, id: Uuid) -> ReportingResult<Option<Workflow>> {
        Ok(self.fetch_workflow(&id)?)
    }

    async fn list_workflows(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> ReportingResult<Vec<Workflow>> {
        Ok(self.workflows_for_operation(operation_id, limit)?)
    }

    async fn get_task(&self, id: Uuid) -> ReportingResult<Option<Task>> {
        Ok(self.fetch_task(&id)?)
    }

    async fn list_tasks(&self, workflow_id: Uuid) -> ReportingResult<Vec<Task>> {
        Ok(self.tasks_for_workflow(&workflow_id)?)
    }

    async fn list_logs(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> ReportingResult<Vec<LogEntry>> {
        Ok(self.logs_for_workflow(&workflow_id, limit)?)
    }
}

#[async_trait]
impl OperationRegistry for Database {
    async fn find_operation(&self, id: &str) -> ReportingResult<Option<Operation>> {
        Ok(self.fetch_operation(id)?)
    }

    async fn list_operations_with_reporting_enabled(&self) -> ReportingResult<Vec<Operation>> {
        Ok(self.list_operations(true)?)
    }
}

#[async_trait]
impl ReportStore for Database {
    async fn latest_report(
        &self,
        agent_id: &str,
        operation_id: &str,
    ) -> ReportingResult<Option<Report>> {
        Ok(self.latest_report_for(agent_id, operation_id)?)
    }

    async fn save_report(&self, report: &Report) -> ReportingResult<()> {
        Ok(self.insert_report(report)?)
    }

    async fn get_report(&self, id: Uuid) -> ReportingResult<Option<Report>> {
        Ok(self.fetch_report(&id)?)
    }
}

// Helper functions for mapping between database and Rust types

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Only the single-active index conflict; NOT NULL, CHECK or trigger
/// failures surface as real errors
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn time_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_time_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn enum_at<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn map_operation_row(row: &Row) -> rusqlite::Result<Operation> {
    Ok(Operation {
        id: row.get(0)?,
        name: row.get(1)?,
        hourly_reporting_enabled: row.get(2)?,
        created_at: time_at(row, 3)?,
    })
}

fn map_workflow_row(row: &Row) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        workflow_type: row.get(2)?,
        operation_id: row.get(3)?,
        status: enum_at(row, 4)?,
        progress: row.get(5)?,
        created_at: time_at(row, 6)?,
        started_at: optional_time_at(row, 7)?,
        completed_at: optional_time_at(row, 8)?,
        metadata: json_at(row, 9)?,
    })
}

fn map_task_row(row: &Row) -> rusqlite::Result<Task> {
    let output_raw: Option<String> = row.get(8)?;
    let output_data = output_raw
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(8, e)))
        .transpose()?;

    Ok(Task {
        id: uuid_at(row, 0)?,
        workflow_id: uuid_at(row, 1)?,
        agent_id: row.get(2)?,
        task_type: enum_at(row, 3)?,
        task_name: row.get(4)?,
        sequence_order: row.get(5)?,
        status: enum_at(row, 6)?,
        input_data: json_at(row, 7)?,
        output_data,
        error_message: row.get(9)?,
        created_at: time_at(row, 10)?,
        started_at: optional_time_at(row, 11)?,
        completed_at: optional_time_at(row, 12)?,
    })
}

fn map_log_row(row: &Row) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        workflow_id: uuid_at(row, 1)?,
        level: enum_at(row, 2)?,
        message: row.get(3)?,
        context: json_at(row, 4)?,
        timestamp: time_at(row, 5)?,
    })
}

fn map_report_row(row: &Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: uuid_at(row, 0)?,
        agent_id: row.get(1)?,
        operation_id: row.get(2)?,
        page_role: enum_at(row, 3)?,
        reporting_period: time_at(row, 4)?,
        snapshot: json_at(row, 5)?,
        changes: json_at(row, 6)?,
        issues: json_at(row, 7)?,
        recommendations: json_at(row, 8)?,
        metrics: json_at(row, 9)?,
        created_at: time_at(row, 10)?,
    })
}
