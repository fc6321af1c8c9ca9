// Configuration file and agent roster
pub mod config;

// SQLite store
pub mod database;

// Tracing setup
pub mod logging;

// Fan-out, barrier and synthesis engine
pub mod orchestrator;

// Page reporters
pub mod reporter;

// Hourly scheduler
pub mod scheduler;

// Synthesis over reporter output
pub mod synthesis;

// Supervision of background workflow runs
pub mod task_registry;

// Batch and task execution helpers
pub mod workflow_utils;

// Command line interface
pub mod cli;

// Component wiring
pub mod service;

pub use config::{AgentRoster, ReportingConfig};
pub use database::Database;
pub use orchestrator::Orchestrator;
pub use scheduler::{Scheduler, SchedulerStatus, TickOutcome, TickSummary};
pub use service::ReportingService;
