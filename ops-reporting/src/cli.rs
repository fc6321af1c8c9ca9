//! CLI argument parsing

use crate::config::ReportingConfig;
use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Hourly operations reporting and synthesis orchestrator
#[derive(Parser, Debug)]
#[command(name = "ops-reporting", version, about)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "OPS_REPORTING_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "OPS_REPORTING_DB")]
    pub db: Option<PathBuf>,

    /// Snapshot directory (overrides the config file)
    #[arg(long, global = true, env = "OPS_REPORTING_SNAPSHOTS")]
    pub snapshot_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hourly scheduler until interrupted
    Serve,

    /// Start a workflow for one operation now and wait for it to finish
    Trigger { operation_id: String },

    /// Run a single scheduler check and wait for the workflows it starts
    Tick,

    /// Manage operations
    #[command(subcommand)]
    Operations(OperationCommand),

    /// List recent workflows of an operation
    Workflows {
        operation_id: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the tasks of a workflow
    Tasks { workflow_id: Uuid },

    /// Show the audit log of a workflow
    Logs {
        workflow_id: Uuid,
        /// Only the oldest N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum OperationCommand {
    /// Register or rename an operation
    Add {
        id: String,
        name: String,
        /// Register without hourly reporting
        #[arg(long)]
        disabled: bool,
    },
    /// Turn hourly reporting on
    Enable { id: String },
    /// Turn hourly reporting off
    Disable { id: String },
    /// List operations
    List {
        /// Only operations with hourly reporting enabled
        #[arg(long)]
        enabled: bool,
    },
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> Result<ReportingConfig> {
        let mut config = ReportingConfig::load(self.config.as_deref())?;
        if let Some(db) = &self.db {
            config.database_path = Some(db.clone());
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = dir.clone();
        }
        Ok(config)
    }
}
