//! Shared fixtures: scripted workers, a flaky store and a wired orchestrator

use chrono::{DateTime, Utc};
use ops_reporting::config::{AgentRoster, OrchestratorConfig};
use ops_reporting::{Database, Orchestrator};
use ops_reporting_sdk::{
    async_trait, AgentProfile, AgentRole, Decision, LogEntry, LogLevel, NewTask, NewWorkflow,
    PageRole, ReportSummary, ReporterExecutor, ReportingError, ReportingResult, SynthesisOutput,
    Synthesizer, Task, TaskPatch, Workflow, WorkflowPatch, WorkflowStore,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const OP: &str = "op-1";

/// `reporter_1..=n` plus `ops_manager`
pub fn roster(n: usize) -> AgentRoster {
    let mut agents: Vec<AgentProfile> = (1..=n)
        .map(|i| AgentProfile {
            id: format!("reporter_{i}"),
            name: format!("Reporter {i}"),
            role: AgentRole::Reporter,
            page_role: Some(PageRole::ALL[(i - 1) % PageRole::ALL.len()]),
        })
        .collect();
    agents.push(AgentProfile {
        id: "ops_manager".to_string(),
        name: "Operations Manager".to_string(),
        role: AgentRole::Manager,
        page_role: None,
    });
    AgentRoster::new(agents)
}

/// Per-agent behaviour of the scripted reporter
#[derive(Clone)]
pub enum Script {
    Fail(&'static str),
    Panic(&'static str),
    Sleep(Duration),
}

/// Reporter whose outcome per agent is set up front; succeeds by default
#[derive(Default)]
pub struct ScriptedReporter {
    scripts: Mutex<HashMap<String, Script>>,
    default_delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedReporter {
    pub fn script(&self, agent_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), script);
    }

    /// Every unscripted agent sleeps this long before succeeding
    pub fn delay_all(&self, delay: Duration) {
        *self.default_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReporterExecutor for ScriptedReporter {
    async fn execute(
        &self,
        agent_id: &str,
        _operation_id: &str,
        _reporting_period: DateTime<Utc>,
    ) -> ReportingResult<ReportSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().get(agent_id).cloned();
        let default_delay = *self.default_delay.lock().unwrap();
        let result = match script {
            Some(Script::Fail(message)) => Err(ReportingError::worker(message)),
            Some(Script::Panic(message)) => panic!("{}", message),
            Some(Script::Sleep(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => {
                if let Some(delay) = default_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result.map(|_| ReportSummary {
            report_id: Uuid::new_v4(),
            page_role: PageRole::Dashboard,
            changes: 1,
            issues: 0,
            recommendations: 0,
            health_score: 100,
        })
    }
}

/// Synthesizer that counts calls and records workflow progress at call time
pub struct RecordingSynthesizer {
    store: Arc<Database>,
    failure: Mutex<Option<&'static str>>,
    crash: Mutex<Option<&'static str>>,
    pub calls: AtomicUsize,
    pub seen_progress: Mutex<Vec<u8>>,
    pub seen_task_ids: Mutex<Vec<Uuid>>,
}

impl RecordingSynthesizer {
    pub fn new(store: Arc<Database>) -> Self {
        Self {
            store,
            failure: Mutex::new(None),
            crash: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen_progress: Mutex::new(Vec::new()),
            seen_task_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, message: &'static str) {
        *self.failure.lock().unwrap() = Some(message);
    }

    pub fn panic_with(&self, message: &'static str) {
        *self.crash.lock().unwrap() = Some(message);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(
        &self,
        _operation_id: &str,
        reporter_task_ids: &[Uuid],
    ) -> ReportingResult<SynthesisOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_task_ids
            .lock()
            .unwrap()
            .extend_from_slice(reporter_task_ids);

        if let Some(first) = reporter_task_ids.first() {
            if let Some(task) = self.store.get_task(*first).await? {
                if let Some(workflow) = self.store.get_workflow(task.workflow_id).await? {
                    self.seen_progress.lock().unwrap().push(workflow.progress);
                }
            }
        }

        let crash = *self.crash.lock().unwrap();
        if let Some(message) = crash {
            panic!("{}", message);
        }
        let failure = *self.failure.lock().unwrap();
        if let Some(message) = failure {
            return Err(ReportingError::synthesis(message));
        }
        Ok(SynthesisOutput {
            decision: Decision::Stable,
            summary: "all quiet".to_string(),
            priorities: Vec::new(),
            reports_considered: reporter_task_ids.len(),
            reporters_missing: 0,
            health_score: 100,
        })
    }
}

/// Orchestrator over an in-memory database with scripted workers
pub struct Harness {
    pub db: Arc<Database>,
    pub reporter: Arc<ScriptedReporter>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(reporters: usize) -> Self {
        Self::with_config(reporters, OrchestratorConfig::default())
    }

    pub fn with_config(reporters: usize, config: OrchestratorConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_operation(OP, "Operation One", true).unwrap();
        let store: Arc<dyn WorkflowStore> = db.clone();
        Self::with_store(db, store, roster(reporters), config)
    }

    pub fn with_store(
        db: Arc<Database>,
        store: Arc<dyn WorkflowStore>,
        roster: AgentRoster,
        config: OrchestratorConfig,
    ) -> Self {
        let reporter = Arc::new(ScriptedReporter::default());
        let synthesizer = Arc::new(RecordingSynthesizer::new(db.clone()));
        let orchestrator = Orchestrator::new(
            store,
            db.clone(),
            reporter.clone(),
            synthesizer.clone(),
            Arc::new(roster),
            config,
        );
        Self {
            db,
            reporter,
            synthesizer,
            orchestrator,
        }
    }

    /// Start a workflow for [`OP`] and wait until it reaches a terminal status
    pub async fn run(&self) -> Workflow {
        let workflow = self.orchestrator.start(OP, "Hourly report").await.unwrap();
        assert!(self.orchestrator.wait_for(&workflow.id).await);
        self.db.get_workflow(workflow.id).await.unwrap().unwrap()
    }

    pub async fn tasks(&self, workflow_id: Uuid) -> Vec<Task> {
        self.db.list_tasks(workflow_id).await.unwrap()
    }

    pub async fn logs(&self, workflow_id: Uuid) -> Vec<LogEntry> {
        self.db.list_logs(workflow_id, None).await.unwrap()
    }
}

pub fn count_level(logs: &[LogEntry], level: LogLevel) -> usize {
    logs.iter().filter(|entry| entry.level == level).count()
}

/// Store that fails the active-workflow lookup for one operation
pub struct FlakyStore {
    inner: Arc<Database>,
    broken_operation: String,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>, broken_operation: &str) -> Self {
        Self {
            inner,
            broken_operation: broken_operation.to_string(),
        }
    }
}

#[async_trait]
impl WorkflowStore for FlakyStore {
    async fn create_workflow(&self, spec: NewWorkflow) -> ReportingResult<Workflow> {
        self.inner.create_workflow(spec).await
    }

    async fn create_tasks(
        &self,
        workflow_id: Uuid,
        specs: Vec<NewTask>,
    ) -> ReportingResult<Vec<Task>> {
        self.inner.create_tasks(workflow_id, specs).await
    }

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> ReportingResult<Task> {
        self.inner.update_task(id, patch).await
    }

    async fn update_workflow(&self, id: Uuid, patch: WorkflowPatch) -> ReportingResult<Workflow> {
        self.inner.update_workflow(id, patch).await
    }

    async fn find_active_workflow(
        &self,
        operation_id: &str,
        workflow_type: &str,
    ) -> ReportingResult<Option<Workflow>> {
        if operation_id == self.broken_operation {
            return Err(anyhow::anyhow!("connection reset while querying {operation_id}").into());
        }
        self.inner.find_active_workflow(operation_id, workflow_type).await
    }

    async fn append_log(
        &self,
        workflow_id: Uuid,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
    ) -> ReportingResult<()> {
        self.inner.append_log(workflow_id, level, message, context).await
    }

    async fn get_workflow(&self, id: Uuid) -> ReportingResult<Option<Workflow>> {
        self.inner.get_workflow(id).await
    }

    async fn list_workflows(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> ReportingResult<Vec<Workflow>> {
        self.inner.list_workflows(operation_id, limit).await
    }

    async fn get_task(&self, id: Uuid) -> ReportingResult<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self, workflow_id: Uuid) -> ReportingResult<Vec<Task>> {
        self.inner.list_tasks(workflow_id).await
    }

    async fn list_logs(
        &self,
        workflow_id: Uuid,
        limit: Option<usize>,
    ) -> ReportingResult<Vec<LogEntry>> {
        self.inner.list_logs(workflow_id, limit).await
    }
}
