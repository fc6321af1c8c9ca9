//! Scheduler ticks: skip-if-active, per-operation isolation, manual triggers

use super::common::*;
use ops_reporting::config::{OrchestratorConfig, SchedulerConfig, DEFAULT_WORKFLOW_TYPE};
use ops_reporting::{Database, Scheduler, TickOutcome};
use ops_reporting_sdk::{
    NewWorkflow, ReportingError, WorkflowPatch, WorkflowStatus, WorkflowStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn scheduler_for(h: &Harness, operation_delay_ms: u64) -> Scheduler {
    Scheduler::new(
        h.orchestrator.clone(),
        SchedulerConfig {
            interval_secs: 3600,
            operation_delay_ms,
        },
    )
}

async fn running_workflow(db: &Database, operation_id: &str) {
    let workflow = db
        .create_workflow(NewWorkflow {
            name: "In flight".to_string(),
            workflow_type: DEFAULT_WORKFLOW_TYPE.to_string(),
            operation_id: operation_id.to_string(),
            metadata: json!({}),
        })
        .await
        .unwrap();
    db.update_workflow(workflow.id, WorkflowPatch::status(WorkflowStatus::Running))
        .await
        .unwrap();
}

async fn summary_of(scheduler: &Scheduler) -> ops_reporting::TickSummary {
    match scheduler.check_and_execute().await {
        TickOutcome::Completed(summary) => summary,
        TickOutcome::Busy => panic!("scheduler unexpectedly busy"),
    }
}

#[tokio::test]
async fn test_tick_skips_operation_with_active_workflow() {
    let h = Harness::new(2);
    h.db.upsert_operation("op-b", "Operation B", true).unwrap();
    running_workflow(&h.db, OP).await;

    let scheduler = scheduler_for(&h, 0);
    let summary = summary_of(&scheduler).await;

    assert_eq!(summary.skipped, vec![OP.to_string()]);
    assert_eq!(summary.started.len(), 1);
    assert!(summary.failed.is_empty());
    assert_eq!(h.db.list_workflows(OP, 10).await.unwrap().len(), 1);

    let b = h.db.list_workflows("op-b", 10).await.unwrap();
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].id, summary.started[0]);
    h.orchestrator.wait_for(&b[0].id).await;
}

#[tokio::test]
async fn test_tick_ignores_disabled_operations() {
    let h = Harness::new(1);
    h.db.upsert_operation("op-off", "Disabled", false).unwrap();

    let scheduler = scheduler_for(&h, 0);
    let summary = summary_of(&scheduler).await;

    assert_eq!(summary.started.len(), 1);
    assert!(h.db.list_workflows("op-off", 10).await.unwrap().is_empty());
    h.orchestrator.drain_or_abort(Duration::from_secs(30)).await;
}

#[tokio::test]
async fn test_failing_operation_does_not_block_the_rest() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.upsert_operation("op-a", "Operation A", true).unwrap();
    db.upsert_operation("op-b", "Operation B", true).unwrap();
    let store = Arc::new(FlakyStore::new(db.clone(), "op-a"));
    let h = Harness::with_store(db, store, roster(2), OrchestratorConfig::default());

    let scheduler = scheduler_for(&h, 5);
    let summary = summary_of(&scheduler).await;

    assert_eq!(summary.failed, vec!["op-a".to_string()]);
    assert_eq!(summary.started.len(), 1);
    assert_eq!(h.db.list_workflows("op-b", 10).await.unwrap().len(), 1);
    assert!(!scheduler.status().is_processing);
    h.orchestrator.drain_or_abort(Duration::from_secs(30)).await;
}

#[tokio::test]
async fn test_overlapping_tick_is_dropped() {
    let h = Harness::new(1);
    h.db.upsert_operation("op-b", "Operation B", true).unwrap();
    let scheduler = scheduler_for(&h, 300);

    let background = scheduler.clone();
    let first = tokio::spawn(async move { background.check_and_execute().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(scheduler.status().is_processing);
    assert_eq!(scheduler.check_and_execute().await, TickOutcome::Busy);

    let outcome = first.await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(ref s) if s.started.len() == 2));
    assert!(!scheduler.status().is_processing);
    h.orchestrator.drain_or_abort(Duration::from_secs(30)).await;
}

#[tokio::test]
async fn test_trigger_now_starts_workflow() {
    let h = Harness::new(2);
    let scheduler = scheduler_for(&h, 0);

    let workflow_id = scheduler.trigger_now(OP).await.unwrap();
    h.orchestrator.wait_for(&workflow_id).await;
    let workflow = h.db.get_workflow(workflow_id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert!(workflow.name.starts_with("Manual"));
}

#[tokio::test]
async fn test_trigger_now_unknown_operation() {
    let h = Harness::new(2);
    let scheduler = scheduler_for(&h, 0);
    let err = scheduler.trigger_now("nope").await.unwrap_err();
    assert!(matches!(err, ReportingError::NotFound { .. }));
}

#[tokio::test]
async fn test_trigger_now_cannot_duplicate_active_workflow() {
    let h = Harness::new(2);
    running_workflow(&h.db, OP).await;
    let scheduler = scheduler_for(&h, 0);

    let err = scheduler.trigger_now(OP).await.unwrap_err();
    assert!(matches!(err, ReportingError::AlreadyActive { .. }));
    assert_eq!(h.db.list_workflows(OP, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_runs_first_check_immediately() {
    let h = Harness::new(1);
    let scheduler = scheduler_for(&h, 0);

    scheduler.start();
    let mut started = Vec::new();
    for _ in 0..100 {
        started = h.db.list_workflows(OP, 10).await.unwrap();
        if !started.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(started.len(), 1);

    let status = scheduler.status();
    assert!(status.running);
    assert!(status.next_run.is_some());

    scheduler.stop().await;
    assert!(!scheduler.status().running);
    h.orchestrator.drain_or_abort(Duration::from_secs(30)).await;
}
