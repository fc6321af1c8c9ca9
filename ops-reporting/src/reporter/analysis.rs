//! Snapshot analysis: changes, issues, recommendations and metrics
//!
//! Every function here is pure; the executor feeds it the current snapshot and
//! the snapshot of the agent's previous report.

use ops_reporting_sdk::{
    Change, Issue, IssueSeverity, PageRole, Priority, Recommendation, ReportMetrics,
};
use serde_json::{Map, Value};

/// A count increase at least this large earns a review recommendation
pub const JUMP_THRESHOLD: f64 = 10.0;

/// Page-specific issue rules: field, severity, description
fn page_rules(role: PageRole) -> &'static [(&'static str, IssueSeverity, &'static str)] {
    match role {
        PageRole::Dashboard => &[(
            "open_alerts_count",
            IssueSeverity::Medium,
            "open alerts need triage",
        )],
        PageRole::Targets => &[(
            "unreachable_targets_count",
            IssueSeverity::Low,
            "targets are unreachable",
        )],
        PageRole::Vulnerabilities => &[(
            "high_severity_count",
            IssueSeverity::Medium,
            "high severity vulnerabilities are open",
        )],
        PageRole::Workflows => &[(
            "stalled_workflows_count",
            IssueSeverity::Medium,
            "workflows are stalled",
        )],
        PageRole::Agents => &[(
            "offline_agents_count",
            IssueSeverity::Medium,
            "agents are offline",
        )],
        PageRole::Reports => &[(
            "overdue_reports_count",
            IssueSeverity::Low,
            "reports are overdue",
        )],
    }
}

fn is_count_field(name: &str) -> bool {
    name.ends_with("_count")
}

fn count(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Render whole numbers without a trailing `.0`
fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Compare the current snapshot against the previous one
///
/// Without a baseline the whole snapshot is new and a single `FirstReport`
/// change is returned. Otherwise each numeric `*_count` field of the baseline
/// that moved yields a `CountDelta`; a field missing from the current
/// snapshot counts as zero.
pub fn detect_changes(
    baseline: Option<&Map<String, Value>>,
    current: &Map<String, Value>,
) -> Vec<Change> {
    let Some(baseline) = baseline else {
        return vec![Change::FirstReport {
            fields: current.len(),
        }];
    };

    baseline
        .iter()
        .filter(|(field, _)| is_count_field(field))
        .filter_map(|(field, previous)| {
            let previous = count(previous)?;
            let current = current.get(field).and_then(count).unwrap_or(0.0);
            let delta = current - previous;
            (delta != 0.0).then(|| Change::CountDelta {
                field: field.clone(),
                previous,
                current,
                delta,
            })
        })
        .collect()
}

/// Apply the generic and page-specific issue rules, most severe first
pub fn identify_issues(role: PageRole, snapshot: &Map<String, Value>) -> Vec<Issue> {
    let mut issues = Vec::new();

    for (field, value) in snapshot {
        let Some(value) = count(value).filter(|v| *v > 0.0) else {
            continue;
        };
        if !is_count_field(field) {
            continue;
        }
        if field.starts_with("critical") {
            issues.push(Issue {
                severity: IssueSeverity::High,
                field: field.clone(),
                value,
                message: format!("{} critical items reported in {}", fmt_number(value), field),
            });
        } else if field.starts_with("failed") {
            issues.push(Issue {
                severity: IssueSeverity::Medium,
                field: field.clone(),
                value,
                message: format!("{} failures reported in {}", fmt_number(value), field),
            });
        }
    }

    for (field, severity, description) in page_rules(role) {
        if let Some(value) = snapshot.get(*field).and_then(count).filter(|v| *v > 0.0) {
            issues.push(Issue {
                severity: *severity,
                field: field.to_string(),
                value,
                message: format!("{} {}", fmt_number(value), description),
            });
        }
    }

    issues.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.field.cmp(&b.field)));
    issues
}

/// One recommendation per issue, plus a review for every large count jump
pub fn generate_recommendations(issues: &[Issue], changes: &[Change]) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = issues
        .iter()
        .map(|issue| match issue.severity {
            IssueSeverity::High => Recommendation {
                priority: Priority::Urgent,
                action: format!("Remediate {} immediately", issue.field),
                rationale: issue.message.clone(),
            },
            IssueSeverity::Medium => Recommendation {
                priority: Priority::High,
                action: format!("Investigate {}", issue.field),
                rationale: issue.message.clone(),
            },
            IssueSeverity::Low => Recommendation {
                priority: Priority::Normal,
                action: format!("Follow up on {}", issue.field),
                rationale: issue.message.clone(),
            },
        })
        .collect();

    for change in changes {
        if let Change::CountDelta {
            field,
            previous,
            current,
            delta,
        } = change
        {
            if *delta >= JUMP_THRESHOLD {
                recommendations.push(Recommendation {
                    priority: Priority::Low,
                    action: format!("Review the increase in {}", field),
                    rationale: format!(
                        "{} rose from {} to {}",
                        field,
                        fmt_number(*previous),
                        fmt_number(*current)
                    ),
                });
            }
        }
    }

    recommendations
}

/// `100 - 25*high - 10*medium - 5*low`, clamped to 0..=100
pub fn health_score(high: usize, medium: usize, low: usize) -> u8 {
    let penalty = 25 * high as i64 + 10 * medium as i64 + 5 * low as i64;
    (100 - penalty).clamp(0, 100) as u8
}

pub fn compute_metrics(
    snapshot: &Map<String, Value>,
    changes: &[Change],
    issues: &[Issue],
) -> ReportMetrics {
    let by_severity =
        |severity: IssueSeverity| issues.iter().filter(|issue| issue.severity == severity).count();
    let high_issues = by_severity(IssueSeverity::High);
    let medium_issues = by_severity(IssueSeverity::Medium);
    let low_issues = by_severity(IssueSeverity::Low);

    ReportMetrics {
        change_count: changes.len(),
        high_issues,
        medium_issues,
        low_issues,
        health_score: health_score(high_issues, medium_issues, low_issues),
        snapshot_fields: snapshot.len(),
    }
}
