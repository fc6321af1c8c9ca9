//! Deterministic digest over one period's reporter output

use async_trait::async_trait;
use ops_reporting_sdk::{
    Decision, IssueSeverity, Recommendation, Report, ReportStore, ReportSummary, ReportingError,
    ReportingResult, SynthesisOutput, Synthesizer, TaskStatus, WorkflowStore,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Priorities carried into the digest
pub const MAX_PRIORITIES: usize = 10;

/// Combines the reports behind completed reporter tasks into one decision
pub struct DigestSynthesizer {
    store: Arc<dyn WorkflowStore>,
    reports: Arc<dyn ReportStore>,
}

impl DigestSynthesizer {
    pub fn new(store: Arc<dyn WorkflowStore>, reports: Arc<dyn ReportStore>) -> Self {
        Self { store, reports }
    }

    /// Report produced by a reporter task, if the task completed and the report still exists
    async fn report_for_task(&self, task_id: Uuid) -> ReportingResult<Option<Report>> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Completed {
            return Ok(None);
        }
        let summary = task
            .output_data
            .and_then(|output| serde_json::from_value::<ReportSummary>(output).ok());
        match summary {
            Some(summary) => self.reports.get_report(summary.report_id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Synthesizer for DigestSynthesizer {
    async fn synthesize(
        &self,
        operation_id: &str,
        reporter_task_ids: &[Uuid],
    ) -> ReportingResult<SynthesisOutput> {
        let mut reports = Vec::with_capacity(reporter_task_ids.len());
        for task_id in reporter_task_ids {
            match self.report_for_task(*task_id).await? {
                Some(report) => reports.push(report),
                None => debug!(task_id = %task_id, "Skipping reporter without usable output"),
            }
        }

        if reports.is_empty() {
            return Err(ReportingError::synthesis(format!(
                "no usable reports among {} reporter tasks",
                reporter_task_ids.len()
            )));
        }

        let missing = reporter_task_ids.len() - reports.len();
        let output = digest(operation_id, &reports, missing);
        info!(
            operation_id = %operation_id,
            decision = ?output.decision,
            reports = output.reports_considered,
            missing = output.reporters_missing,
            "Synthesis produced"
        );
        Ok(output)
    }
}

/// Fold reports into a decision, a summary line and the top priorities
pub fn digest(
    operation_id: &str,
    reports: &[Report],
    reporters_missing: usize,
) -> SynthesisOutput {
    let count = |severity: IssueSeverity| {
        reports
            .iter()
            .flat_map(|report| &report.issues)
            .filter(|issue| issue.severity == severity)
            .count()
    };
    let high = count(IssueSeverity::High);
    let medium = count(IssueSeverity::Medium);
    let low = count(IssueSeverity::Low);

    let decision = if high > 0 {
        Decision::Critical
    } else if medium > 0 {
        Decision::Attention
    } else {
        Decision::Stable
    };

    let health_score = if reports.is_empty() {
        0
    } else {
        let total: f64 = reports.iter().map(|r| r.metrics.health_score as f64).sum();
        (total / reports.len() as f64).round() as u8
    };

    let mut priorities: Vec<Recommendation> = reports
        .iter()
        .flat_map(|report| report.recommendations.iter().cloned())
        .collect();
    // Stable sort keeps reporter order within a priority
    priorities.sort_by(|a, b| b.priority.cmp(&a.priority));
    let mut seen = HashSet::new();
    priorities.retain(|rec| seen.insert(rec.action.clone()));
    priorities.truncate(MAX_PRIORITIES);

    let summary = format!(
        "Operation {}: {} of {} reporters delivered; {} high, {} medium, {} low issues; average health {}",
        operation_id,
        reports.len(),
        reports.len() + reporters_missing,
        high,
        medium,
        low,
        health_score
    );

    SynthesisOutput {
        decision,
        summary,
        priorities,
        reports_considered: reports.len(),
        reporters_missing,
        health_score,
    }
}
