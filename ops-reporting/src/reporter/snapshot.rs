//! Sources of per-page domain snapshots

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ops_reporting_sdk::PageRole;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::debug;

/// Flat JSON object of domain metrics for one page
pub type Snapshot = Map<String, Value>;

/// Provides the current state a reporter analyses
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, role: PageRole, operation_id: &str) -> Result<Snapshot>;
}

/// Reads snapshots dropped on disk by external feeds
///
/// Lookup order is `<root>/<operation_id>/<role>.json`, then
/// `<root>/<role>.json` for feeds that are not split per operation.
pub struct DirectorySnapshotSource {
    root: PathBuf,
}

impl DirectorySnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, role: PageRole, operation_id: &str) -> [PathBuf; 2] {
        let file = format!("{}.json", role.as_str());
        [self.root.join(operation_id).join(&file), self.root.join(file)]
    }
}

#[async_trait]
impl SnapshotSource for DirectorySnapshotSource {
    async fn snapshot(&self, role: PageRole, operation_id: &str) -> Result<Snapshot> {
        for path in self.candidates(role, operation_id) {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            debug!(path = %path.display(), "Reading snapshot");
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid snapshot JSON: {}", path.display()))?;
            return match value {
                Value::Object(map) => Ok(map),
                _ => bail!("Snapshot is not a JSON object: {}", path.display()),
            };
        }

        bail!(
            "No {} snapshot for operation {} under {}",
            role,
            operation_id,
            self.root.display()
        )
    }
}
