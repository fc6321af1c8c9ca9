//! Fan-out reporters
//!
//! - **snapshot**: where page state comes from
//! - **analysis**: change detection, issue rules, recommendations, metrics
//! - **executor**: [`PageReporter`], the `ReporterExecutor` implementation

pub mod analysis;
pub mod executor;
pub mod snapshot;

pub use executor::{build_report, PageReporter};
pub use snapshot::{DirectorySnapshotSource, Snapshot, SnapshotSource};
