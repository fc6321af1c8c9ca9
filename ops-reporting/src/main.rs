use anyhow::{Context, Result};
use clap::Parser;
use ops_reporting::cli::{Cli, Command, OperationCommand};
use ops_reporting::logging::init_tracing;
use ops_reporting::{ReportingService, TickOutcome};
use ops_reporting_sdk::{Workflow, WorkflowStore};
use serde::Serialize;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config()?;
    let service = ReportingService::open(&config)?;

    match cli.command {
        Command::Serve => serve(&service).await,
        Command::Trigger { operation_id } => trigger(&service, &operation_id).await,
        Command::Tick => tick(&service).await,
        Command::Operations(command) => operations(&service, command),
        Command::Workflows {
            operation_id,
            limit,
        } => print_json(&service.orchestrator.workflows_for(&operation_id, limit).await?),
        Command::Tasks { workflow_id } => {
            print_json(&service.orchestrator.tasks_for(workflow_id).await?)
        }
        Command::Logs { workflow_id, limit } => {
            print_json(&service.orchestrator.logs_for(workflow_id, limit).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(service: &ReportingService) -> Result<()> {
    service.recover_interrupted()?;
    service.scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    service.shutdown().await
}

async fn trigger(service: &ReportingService, operation_id: &str) -> Result<()> {
    let workflow_id = service.scheduler.trigger_now(operation_id).await?;
    eprintln!("Started workflow {}", workflow_id);

    service.orchestrator.wait_for(&workflow_id).await;
    match service.database.get_workflow(workflow_id).await? {
        Some(workflow) => print_json(&workflow),
        None => Ok(()),
    }
}

async fn tick(service: &ReportingService) -> Result<()> {
    match service.scheduler.check_and_execute().await {
        TickOutcome::Busy => println!("A check is already running"),
        TickOutcome::Completed(summary) => {
            for workflow_id in &summary.started {
                service.orchestrator.wait_for(workflow_id).await;
                if let Some(workflow) = service.database.get_workflow(*workflow_id).await? {
                    print_workflow(&workflow);
                }
            }
            println!(
                "started {}, skipped {}, failed {}",
                summary.started.len(),
                summary.skipped.len(),
                summary.failed.len()
            );
        }
    }
    Ok(())
}

fn operations(service: &ReportingService, command: OperationCommand) -> Result<()> {
    let db = &service.database;
    match command {
        OperationCommand::Add { id, name, disabled } => {
            let operation = db.upsert_operation(&id, &name, !disabled)?;
            println!("Saved operation {} ({})", operation.id, operation.name);
        }
        OperationCommand::Enable { id } => set_enabled(db, &id, true)?,
        OperationCommand::Disable { id } => set_enabled(db, &id, false)?,
        OperationCommand::List { enabled } => {
            for operation in db.list_operations(enabled)? {
                println!(
                    "{:<20} {:<32} hourly={}",
                    operation.id, operation.name, operation.hourly_reporting_enabled
                );
            }
        }
    }
    Ok(())
}

fn set_enabled(db: &ops_reporting::Database, id: &str, enabled: bool) -> Result<()> {
    if !db.set_reporting_enabled(id, enabled)? {
        anyhow::bail!("operation not found: {}", id);
    }
    println!(
        "Hourly reporting {} for {}",
        if enabled { "enabled" } else { "disabled" },
        id
    );
    Ok(())
}

fn print_workflow(workflow: &Workflow) {
    println!(
        "{}  {:<9} {:>3}%  {}  {}",
        workflow.id,
        workflow.status.as_str(),
        workflow.progress,
        workflow.created_at.format("%Y-%m-%d %H:%M"),
        workflow.name
    );
}
