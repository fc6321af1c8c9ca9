//! Workflow lifecycle: task graph, fan-out, barrier and synthesis

use super::common::*;
use ops_reporting::config::OrchestratorConfig;
use ops_reporting_sdk::{
    LogLevel, ReportingError, SynthesisTaskInput, TaskStatus, TaskType, WorkflowStatus,
    WorkflowStore,
};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_start_creates_task_graph() {
    let h = Harness::new(4);
    let workflow = h.orchestrator.start(OP, "Hourly report").await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Pending);
    assert_eq!(workflow.progress, 0);
    assert_eq!(workflow.metadata["planned_reporters"], 4);
    assert!(workflow.metadata.get("reporting_period").is_some());

    let tasks = h.tasks(workflow.id).await;
    assert_eq!(tasks.len(), 5);
    let orders: Vec<u32> = tasks.iter().map(|t| t.sequence_order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4, 5]);
    assert!(tasks[..4].iter().all(|t| t.task_type == TaskType::Report));

    let synthesis = &tasks[4];
    assert_eq!(synthesis.task_type, TaskType::Synthesis);
    assert_eq!(synthesis.agent_id, "ops_manager");
    let input: SynthesisTaskInput = serde_json::from_value(synthesis.input_data.clone()).unwrap();
    let expected: HashSet<Uuid> = tasks[..4].iter().map(|t| t.id).collect();
    assert_eq!(input.reporter_task_ids.iter().copied().collect::<HashSet<_>>(), expected);

    h.orchestrator.wait_for(&workflow.id).await;
}

#[tokio::test]
async fn test_all_reporters_succeed() {
    let h = Harness::new(3);
    let workflow = h.run().await;

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.progress, 100);
    assert!(workflow.started_at.is_some());
    assert!(workflow.completed_at.is_some());
    assert_eq!(h.reporter.calls(), 3);
    assert_eq!(h.synthesizer.calls(), 1);
    assert_eq!(*h.synthesizer.seen_progress.lock().unwrap(), vec![80]);

    let tasks = h.tasks(workflow.id).await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(tasks[3].output_data.is_some());

    let logs = h.logs(workflow.id).await;
    assert_eq!(count_level(&logs, LogLevel::Warning), 0);
    assert_eq!(count_level(&logs, LogLevel::Error), 0);
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages.first(), Some(&"Workflow created"));
    assert_eq!(messages.last(), Some(&"Workflow completed successfully"));
    assert!(messages.contains(&"Reporter phase finished: 3/3 succeeded"));
}

#[tokio::test]
async fn test_partial_failure_degrades_gracefully() {
    let h = Harness::new(4);
    h.reporter.script("reporter_1", Script::Fail("feed offline"));
    h.reporter.script("reporter_3", Script::Fail("bad gateway"));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.progress, 100);
    // round(2 / 4 * 80)
    assert_eq!(*h.synthesizer.seen_progress.lock().unwrap(), vec![40]);

    let logs = h.logs(workflow.id).await;
    assert_eq!(count_level(&logs, LogLevel::Warning), 1);
}

#[tokio::test]
async fn test_intermediate_progress_rounds() {
    let h = Harness::new(3);
    h.reporter.script("reporter_2", Script::Fail("nope"));
    h.reporter.script("reporter_3", Script::Fail("nope"));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    // round(1 / 3 * 80) = round(26.67)
    assert_eq!(*h.synthesizer.seen_progress.lock().unwrap(), vec![27]);
}

#[tokio::test]
async fn test_upstream_timeout_scenario() {
    let h = Harness::new(3);
    h.reporter.script("reporter_2", Script::Fail("upstream timeout"));

    let workflow = h.run().await;
    let tasks = h.tasks(workflow.id).await;

    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[1].status, TaskStatus::Failed);
    assert_eq!(tasks[1].error_message.as_deref(), Some("upstream timeout"));
    assert!(tasks[1].completed_at.is_some());
    assert_eq!(tasks[2].status, TaskStatus::Completed);
    assert_eq!(tasks[3].task_type, TaskType::Synthesis);
    assert_eq!(tasks[3].status, TaskStatus::Completed);

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.progress, 100);

    let logs = h.logs(workflow.id).await;
    let warnings: Vec<_> = logs
        .iter()
        .filter(|entry| entry.level == LogLevel::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("2/3 succeeded"));
}

#[tokio::test]
async fn test_total_failure_never_synthesizes() {
    let h = Harness::new(3);
    for agent in ["reporter_1", "reporter_2", "reporter_3"] {
        h.reporter.script(agent, Script::Fail("down"));
    }

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert_eq!(workflow.progress, 0);
    assert!(workflow.completed_at.is_some());
    assert_eq!(h.reporter.calls(), 3);
    assert_eq!(h.synthesizer.calls(), 0);

    let tasks = h.tasks(workflow.id).await;
    assert_eq!(tasks[3].status, TaskStatus::Pending);

    let logs = h.logs(workflow.id).await;
    let errors: Vec<_> = logs.iter().filter(|l| l.level == LogLevel::Error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("all 3 reporters failed"));
}

#[tokio::test]
async fn test_synthesis_failure_keeps_reporter_results() {
    let h = Harness::new(3);
    h.synthesizer.fail_with("model unavailable");

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert!(workflow.completed_at.is_some());
    assert_eq!(workflow.progress, 80);

    let tasks = h.tasks(workflow.id).await;
    assert!(tasks[..3].iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(tasks[3].status, TaskStatus::Failed);
    assert_eq!(
        tasks[3].error_message.as_deref(),
        Some("synthesis failed: model unavailable")
    );

    let logs = h.logs(workflow.id).await;
    assert_eq!(count_level(&logs, LogLevel::Error), 1);
}

#[tokio::test]
async fn test_panicking_reporter_fails_only_its_task() {
    let h = Harness::new(3);
    h.reporter.script("reporter_2", Script::Panic("parser exploded"));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.progress, 100);

    let tasks = h.tasks(workflow.id).await;
    assert_eq!(tasks[1].status, TaskStatus::Failed);
    assert!(tasks[1].completed_at.is_some());
    assert_eq!(
        tasks[1].error_message.as_deref(),
        Some("worker reporter_2 panicked: parser exploded")
    );
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[2].status, TaskStatus::Completed);

    let logs = h.logs(workflow.id).await;
    assert_eq!(count_level(&logs, LogLevel::Warning), 1);
}

#[tokio::test]
async fn test_panicking_synthesizer_fails_workflow_and_frees_operation() {
    let h = Harness::new(2);
    h.reporter.script("reporter_1", Script::Fail("feed offline"));
    h.synthesizer.panic_with("synth crashed");

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert_eq!(workflow.progress, 40);
    assert!(workflow.completed_at.is_some());

    let tasks = h.tasks(workflow.id).await;
    assert_eq!(tasks[2].task_type, TaskType::Synthesis);
    assert_eq!(tasks[2].status, TaskStatus::Failed);
    assert_eq!(
        tasks[2].error_message.as_deref(),
        Some("worker ops_manager panicked: synth crashed")
    );

    let logs = h.logs(workflow.id).await;
    assert_eq!(count_level(&logs, LogLevel::Error), 1);

    // The operation is not left blocked by a stuck active workflow
    let next = h.orchestrator.start(OP, "retry").await.unwrap();
    h.orchestrator.wait_for(&next.id).await;
}

#[tokio::test]
async fn test_synthesis_receives_reporter_task_ids() {
    let h = Harness::new(2);
    let workflow = h.run().await;

    let tasks = h.tasks(workflow.id).await;
    let seen = h.synthesizer.seen_task_ids.lock().unwrap().clone();
    assert_eq!(seen, vec![tasks[0].id, tasks[1].id]);
}

#[tokio::test]
async fn test_start_rejects_unknown_operation() {
    let h = Harness::new(2);
    let err = h.orchestrator.start("op-missing", "x").await.unwrap_err();
    assert!(matches!(err, ReportingError::NotFound { entity: "operation", .. }));
    assert!(h.db.list_workflows("op-missing", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_requires_manager() {
    let base = Harness::new(0);
    let reporters_only = ops_reporting::AgentRoster::new(
        roster(2)
            .reporters()
            .into_iter()
            .cloned()
            .collect(),
    );
    let h = Harness::with_store(
        base.db.clone(),
        base.db.clone(),
        reporters_only,
        OrchestratorConfig::default(),
    );

    let err = h.orchestrator.start(OP, "x").await.unwrap_err();
    assert!(matches!(err, ReportingError::Configuration(_)));
    assert!(h.db.list_workflows(OP, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_requires_reporters() {
    let h = Harness::new(0);
    let err = h.orchestrator.start(OP, "x").await.unwrap_err();
    assert!(matches!(err, ReportingError::Configuration(_)));
    assert!(h.db.list_workflows(OP, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_start_while_active_is_rejected() {
    let h = Harness::new(2);
    h.reporter.delay_all(Duration::from_millis(200));

    let first = h.orchestrator.start(OP, "first").await.unwrap();
    let err = h.orchestrator.start(OP, "second").await.unwrap_err();
    assert!(matches!(err, ReportingError::AlreadyActive { .. }));

    h.orchestrator.wait_for(&first.id).await;
    let again = h.run().await;
    assert_eq!(again.status, WorkflowStatus::Completed);
    assert_eq!(h.db.list_workflows(OP, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reporters_run_concurrently() {
    let h = Harness::new(5);
    h.reporter.delay_all(Duration::from_millis(100));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(h.reporter.peak(), 5);
}

#[tokio::test]
async fn test_max_concurrency_bounds_fan_out() {
    let config = OrchestratorConfig {
        max_concurrency: 2,
        ..OrchestratorConfig::default()
    };
    let h = Harness::with_config(5, config);
    h.reporter.delay_all(Duration::from_millis(50));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(h.reporter.calls(), 5);
    assert!(h.reporter.peak() <= 2);
}

#[tokio::test]
async fn test_worker_deadline_fails_hung_reporter() {
    let config = OrchestratorConfig {
        worker_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let h = Harness::with_config(2, config);
    h.reporter.script("reporter_2", Script::Sleep(Duration::from_secs(30)));

    let workflow = h.run().await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let tasks = h.tasks(workflow.id).await;
    assert_eq!(tasks[1].status, TaskStatus::Failed);
    assert_eq!(
        tasks[1].error_message.as_deref(),
        Some("worker reporter_2 timed out after 1000ms")
    );
}

#[tokio::test]
async fn test_read_queries() {
    let h = Harness::new(1);
    let workflow = h.run().await;

    let listed = h.orchestrator.workflows_for(OP, 5).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, workflow.id);
    assert_eq!(h.orchestrator.tasks_for(workflow.id).await.unwrap().len(), 2);
    assert_eq!(
        h.orchestrator.logs_for(workflow.id, Some(1)).await.unwrap()[0].message,
        "Workflow created"
    );
    assert_eq!(
        h.orchestrator.get_workflow(workflow.id).await.unwrap().unwrap().status,
        WorkflowStatus::Completed
    );
}
