//! Service configuration and the agent roster
//!
//! Configuration is read from an optional YAML file; every field has a
//! default, so an empty file (or no file) yields a working hourly setup with
//! one reporter per page role and a single manager.
//!
//! ```yaml
//! snapshot_dir: /var/lib/ops-reporting/snapshots
//! scheduler:
//!   interval_secs: 3600
//!   operation_delay_ms: 2000
//! orchestrator:
//!   workflow_type: ops_management_hourly
//!   worker_timeout_secs: 300
//! agents:
//!   - { id: vulnerabilities_reporter, name: Vulnerabilities Reporter, role: reporter, page_role: vulnerabilities }
//!   - { id: ops_manager, name: Operations Manager, role: manager }
//! ```

use anyhow::{bail, Context, Result};
use ops_reporting_sdk::{AgentProfile, AgentRole, PageRole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Workflow type managed by the hourly scheduler
pub const DEFAULT_WORKFLOW_TYPE: &str = "ops_management_hourly";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// SQLite file; defaults to `~/.ops-reporting/reporting.db`
    pub database_path: Option<PathBuf>,
    /// Root of the per-role snapshot files
    pub snapshot_dir: PathBuf,
    pub scheduler: SchedulerConfig,
    pub orchestrator: OrchestratorConfig,
    pub agents: Vec<AgentProfile>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            snapshot_dir: PathBuf::from("snapshots"),
            scheduler: SchedulerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            agents: default_agents(),
        }
    }
}

impl ReportingConfig {
    /// Load from a YAML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_secs == 0 {
            bail!("scheduler.interval_secs must be greater than zero");
        }
        AgentRoster::new(self.agents.clone()).validate()
    }

    /// Configured database path, falling back to the home directory
    pub fn resolve_database_path(&self) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(".ops-reporting").join("reporting.db"))
            .unwrap_or_else(|| PathBuf::from("reporting.db"))
    }

    pub fn roster(&self) -> AgentRoster {
        AgentRoster::new(self.agents.clone())
    }
}

/// Periodic check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between checks
    pub interval_secs: u64,
    /// Pause between operations within one check
    pub operation_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            operation_delay_ms: 2000,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn operation_delay(&self) -> Duration {
        Duration::from_millis(self.operation_delay_ms)
    }
}

/// Workflow execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub workflow_type: String,
    /// Deadline per reporter call; 0 disables it
    pub worker_timeout_secs: u64,
    /// Deadline for the synthesis call; 0 disables it
    pub synthesis_timeout_secs: u64,
    /// Upper bound on concurrently running reporters; 0 means all at once
    pub max_concurrency: usize,
    /// How long shutdown waits for running workflows before aborting them
    pub shutdown_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workflow_type: DEFAULT_WORKFLOW_TYPE.to_string(),
            worker_timeout_secs: 300,
            synthesis_timeout_secs: 600,
            max_concurrency: 0,
            shutdown_grace_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout_secs > 0).then(|| Duration::from_secs(self.worker_timeout_secs))
    }

    pub fn synthesis_timeout(&self) -> Option<Duration> {
        (self.synthesis_timeout_secs > 0)
            .then(|| Duration::from_secs(self.synthesis_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        (self.max_concurrency > 0).then_some(self.max_concurrency)
    }
}

/// One reporter per page role plus the operations manager
pub fn default_agents() -> Vec<AgentProfile> {
    let mut agents: Vec<AgentProfile> = PageRole::ALL
        .into_iter()
        .map(|role| AgentProfile {
            id: format!("{}_reporter", role.as_str()),
            name: format!("{} Reporter", capitalize(role.as_str())),
            role: AgentRole::Reporter,
            page_role: Some(role),
        })
        .collect();

    agents.push(AgentProfile {
        id: "ops_manager".to_string(),
        name: "Operations Manager".to_string(),
        role: AgentRole::Manager,
        page_role: None,
    });
    agents
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Agents known to the system, in configuration order
#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    agents: Vec<AgentProfile>,
}

impl AgentRoster {
    pub fn new(agents: Vec<AgentProfile>) -> Self {
        Self { agents }
    }

    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    /// Fan-out workers
    pub fn reporters(&self) -> Vec<&AgentProfile> {
        self.agents
            .iter()
            .filter(|agent| agent.role == AgentRole::Reporter)
            .collect()
    }

    /// The synthesis worker (first manager in configuration order)
    pub fn manager(&self) -> Option<&AgentProfile> {
        self.agents.iter().find(|agent| agent.role == AgentRole::Manager)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                bail!("duplicate agent id: {}", agent.id);
            }
            if agent.role == AgentRole::Reporter && agent.page_role.is_none() {
                bail!("reporter agent {} has no page_role", agent.id);
            }
        }
        Ok(())
    }
}
