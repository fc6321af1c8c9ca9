//! Wiring of the store, reporters, synthesizer, orchestrator and scheduler

use crate::config::ReportingConfig;
use crate::database::Database;
use crate::orchestrator::Orchestrator;
use crate::reporter::{DirectorySnapshotSource, PageReporter, SnapshotSource};
use crate::scheduler::Scheduler;
use crate::synthesis::DigestSynthesizer;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Fully wired reporting stack over one SQLite database
pub struct ReportingService {
    pub database: Arc<Database>,
    pub orchestrator: Orchestrator,
    pub scheduler: Scheduler,
    shutdown_grace: Duration,
}

impl ReportingService {
    /// Open the configured database file and snapshot directory
    pub fn open(config: &ReportingConfig) -> Result<Self> {
        let path = config.resolve_database_path();
        let database = Database::new(path.clone())?;
        database.initialize_schema()?;
        info!(path = %path.display(), "Database ready");

        let snapshots = Arc::new(DirectorySnapshotSource::new(config.snapshot_dir.clone()));
        Ok(Self::with_components(Arc::new(database), snapshots, config))
    }

    /// Wire the stack around an existing database and snapshot source
    pub fn with_components(
        database: Arc<Database>,
        snapshots: Arc<dyn SnapshotSource>,
        config: &ReportingConfig,
    ) -> Self {
        let roster = Arc::new(config.roster());
        let reporter = Arc::new(PageReporter::new(database.clone(), snapshots, roster.clone()));
        let synthesizer = Arc::new(DigestSynthesizer::new(database.clone(), database.clone()));
        let orchestrator = Orchestrator::new(
            database.clone(),
            database.clone(),
            reporter,
            synthesizer,
            roster,
            config.orchestrator.clone(),
        );
        let scheduler = Scheduler::new(orchestrator.clone(), config.scheduler.clone());

        Self {
            database,
            orchestrator,
            scheduler,
            shutdown_grace: config.orchestrator.shutdown_grace(),
        }
    }

    /// Fail workflows a previous process left pending or running
    ///
    /// Their background runs died with that process, and an orphaned active
    /// workflow would block its operation forever.
    pub fn recover_interrupted(&self) -> Result<Vec<Uuid>> {
        let ids = self.database.fail_interrupted_workflows()?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "Failed workflows interrupted by a previous shutdown");
        }
        Ok(ids)
    }

    /// Stop the scheduler, then wait for running workflows
    ///
    /// Runs still going after the configured grace period are aborted and
    /// their workflows failed, so no operation stays blocked by them.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.stop().await;
        let aborted = self.orchestrator.drain_or_abort(self.shutdown_grace).await;
        if aborted > 0 {
            self.recover_interrupted()?;
        }
        info!(aborted, "Shutdown complete");
        Ok(())
    }
}
