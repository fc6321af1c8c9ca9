//! Page reporter: the fan-out worker

use super::analysis::{compute_metrics, detect_changes, generate_recommendations, identify_issues};
use super::snapshot::{Snapshot, SnapshotSource};
use crate::config::AgentRoster;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_reporting_sdk::{
    AgentRole, PageRole, Report, ReportStore, ReportSummary, ReporterExecutor, ReportingError,
    ReportingResult,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Reports on one domain page by diffing its snapshot against the previous report
pub struct PageReporter {
    reports: Arc<dyn ReportStore>,
    snapshots: Arc<dyn SnapshotSource>,
    roster: Arc<AgentRoster>,
}

impl PageReporter {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        snapshots: Arc<dyn SnapshotSource>,
        roster: Arc<AgentRoster>,
    ) -> Self {
        Self {
            reports,
            snapshots,
            roster,
        }
    }

    fn page_role(&self, agent_id: &str) -> ReportingResult<PageRole> {
        let agent = self
            .roster
            .get(agent_id)
            .ok_or_else(|| ReportingError::not_found("agent", agent_id))?;
        match (agent.role, agent.page_role) {
            (AgentRole::Reporter, Some(role)) => Ok(role),
            _ => Err(ReportingError::Configuration(format!(
                "agent {} is not a page reporter",
                agent_id
            ))),
        }
    }
}

/// Assemble a report from the current snapshot and the previous report, if any
pub fn build_report(
    agent_id: &str,
    operation_id: &str,
    role: PageRole,
    reporting_period: DateTime<Utc>,
    previous: Option<&Report>,
    snapshot: Snapshot,
) -> Report {
    let baseline = previous.and_then(|report| report.snapshot.as_object());
    let changes = detect_changes(baseline, &snapshot);
    let issues = identify_issues(role, &snapshot);
    let recommendations = generate_recommendations(&issues, &changes);
    let metrics = compute_metrics(&snapshot, &changes, &issues);

    Report {
        id: Uuid::new_v4(),
        agent_id: agent_id.to_string(),
        operation_id: operation_id.to_string(),
        page_role: role,
        reporting_period,
        snapshot: Value::Object(snapshot),
        changes,
        issues,
        recommendations,
        metrics,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl ReporterExecutor for PageReporter {
    async fn execute(
        &self,
        agent_id: &str,
        operation_id: &str,
        reporting_period: DateTime<Utc>,
    ) -> ReportingResult<ReportSummary> {
        let role = self.page_role(agent_id)?;
        let previous = self.reports.latest_report(agent_id, operation_id).await?;

        let snapshot = self
            .snapshots
            .snapshot(role, operation_id)
            .await
            .map_err(|e| ReportingError::worker(format!("{role} snapshot unavailable: {e:#}")))?;

        let report = build_report(
            agent_id,
            operation_id,
            role,
            reporting_period,
            previous.as_ref(),
            snapshot,
        );
        self.reports.save_report(&report).await?;

        info!(
            agent_id = %agent_id,
            operation_id = %operation_id,
            report_id = %report.id,
            issues = report.issues.len(),
            health = report.metrics.health_score,
            "Report generated"
        );
        Ok(ReportSummary::from(&report))
    }
}
