//! Error taxonomy shared by the orchestrator and its collaborators

/// Result alias used across every collaborator trait
pub type ReportingResult<T> = Result<T, ReportingError>;

/// Errors raised while creating or driving a reporting workflow
#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    /// A referenced operation, agent, workflow or task does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The agent roster or settings cannot support a workflow
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store refused a second non-terminal workflow for the same key
    #[error("a {workflow_type} workflow is already active for operation {operation_id}")]
    AlreadyActive {
        operation_id: String,
        workflow_type: String,
    },

    /// A single worker call failed; the message is stored verbatim on the task
    #[error("{0}")]
    WorkerFailure(String),

    /// A worker call exceeded its deadline
    #[error("worker {agent_id} timed out after {timeout_ms}ms")]
    WorkerTimeout { agent_id: String, timeout_ms: u64 },

    /// Every fan-out task of a workflow failed
    #[error("all {total} reporters failed")]
    AggregateFailure { total: usize },

    /// The synthesis step failed after the barrier passed
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Storage or other infrastructure failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ReportingError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::WorkerFailure(message.into())
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::Synthesis(message.into())
    }
}
