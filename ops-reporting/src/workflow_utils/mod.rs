//! Workflow utilities shared by the orchestration phases
//!
//! - **batch**: Settle-all parallel execution with optional concurrency control
//! - **task**: Task execution with persisted status transitions and deadlines

pub mod batch;
pub mod task;

pub use batch::{execute_batch_settled, BatchOutcome, Settled, TaskContext};
pub use task::{panic_message, run_task};
