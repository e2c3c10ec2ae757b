//! Process supervisor: spawns, tracks and terminates agent workers.
//!
//! Agent records live in the session's on-disk registry so that separate CLI
//! invocations see the same agents. Statuses are refreshed from the OS every
//! time records are read.

pub mod process;
pub mod registry;
pub mod types;

pub use process::{LaunchSpec, Liveness, OsProcessControl, ProcessControl};
pub use registry::{Registry, RegistryData, RegistryError};
pub use types::{AgentRecord, AgentStatus};

use crate::config::SubagentConfig;
use crate::identity::{AgentEnv, AgentMode, ProcessEnv, SUBAGENT_MARKER_ENV};
use crate::session::SessionPaths;
use chrono::Utc;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(
        "refusing to spawn: this process is itself a sub-agent (SUBAGENT_IS_AGENT is set). \
         Ask the primary session to spawn helpers instead."
    )]
    ForkBombRefused,
    #[error("agent {id} not found")]
    NotFound { id: String },
    #[error("agent {id} is not running (status: {status})")]
    NotRunning { id: String, status: AgentStatus },
    #[error("spawn failed: {reason}")]
    SpawnFailed { reason: String },
    #[error("failed to kill {id}: {reason}")]
    KillFailed { id: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Program and arguments started for every agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// The configured worker program, or this executable's `worker` subcommand
    pub fn from_config(config: &SubagentConfig) -> Result<Self, SupervisorError> {
        if let Some(program) = &config.supervisor.worker_program {
            return Ok(Self {
                program: program.clone(),
                args: Vec::new(),
            });
        }
        let program = std::env::current_exe().map_err(|e| SupervisorError::SpawnFailed {
            reason: format!("cannot locate the subagent executable: {e}"),
        })?;
        Ok(Self {
            program,
            args: vec!["worker".to_string()],
        })
    }
}

/// Outcome of `kill_all`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KillAllReport {
    pub killed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Supervisor<P: ProcessControl = OsProcessControl> {
    paths: SessionPaths,
    registry: Registry,
    process: P,
    env: ProcessEnv,
    worker: WorkerCommand,
    default_model: String,
}

impl Supervisor<OsProcessControl> {
    pub fn new(paths: SessionPaths, config: &SubagentConfig) -> Result<Self, SupervisorError> {
        let worker = WorkerCommand::from_config(config)?;
        Ok(Self::with_parts(
            paths,
            OsProcessControl::new(),
            ProcessEnv::current(),
            worker,
            &config.supervisor.default_model,
        ))
    }
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn with_parts(
        paths: SessionPaths,
        process: P,
        env: ProcessEnv,
        worker: WorkerCommand,
        default_model: &str,
    ) -> Self {
        let registry = Registry::new(&paths);
        Self {
            paths,
            registry,
            process,
            env,
            worker,
            default_model: default_model.to_string(),
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// The fork-bomb guard. Sub-agents may never spawn.
    pub fn spawn_guard(&self) -> Result<(), SupervisorError> {
        if self.env.is_subagent() {
            warn!(marker = SUBAGENT_MARKER_ENV, "Spawn refused inside a sub-agent");
            return Err(SupervisorError::ForkBombRefused);
        }
        Ok(())
    }

    /// Launch a detached worker and record it as running. Returns immediately.
    pub async fn spawn_agent(
        &self,
        task: &str,
        model: Option<&str>,
        persistent: bool,
    ) -> Result<AgentRecord, SupervisorError> {
        self.spawn_guard()?;

        let task = task.trim();
        if task.is_empty() {
            return Err(SupervisorError::SpawnFailed {
                reason: "task must not be empty".to_string(),
            });
        }

        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string();
        let mode = AgentMode::from_persistent_flag(persistent);
        let agent_id = self.registry.update(|data| data.allocate_id())?;
        let log_path = self.paths.agent_log(&agent_id);

        let identity = AgentEnv {
            session: self.paths.id.to_string(),
            agent_id: agent_id.clone(),
            task: task.to_string(),
            model: model.clone(),
            mode,
        };
        let spec = LaunchSpec {
            program: self.worker.program.clone(),
            args: self.worker.args.clone(),
            env: identity
                .to_env_pairs()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            log_path: log_path.clone(),
        };

        let pid = self.process.launch(&spec).await.map_err(|e| {
            warn!(agent_id = %agent_id, error = %e, "Agent launch failed");
            SupervisorError::SpawnFailed {
                reason: format!("{}: {e}", spec.program.display()),
            }
        })?;

        let record = AgentRecord {
            agent_id: agent_id.clone(),
            pid,
            task: task.to_string(),
            model,
            mode,
            status: AgentStatus::Running,
            started_at: Utc::now(),
            log_path,
            ended_at: None,
            exit_code: None,
        };
        let stored = record.clone();
        self.registry.update(move |data| data.agents.push(stored))?;

        info!(agent_id = %agent_id, pid, mode = %mode, "Agent spawned");
        Ok(record)
    }

    /// All records, oldest first, with statuses refreshed
    pub fn list_agents(&self) -> Result<Vec<AgentRecord>, SupervisorError> {
        let process = &self.process;
        Ok(self.registry.update(|data| {
            for record in data.agents.iter_mut() {
                refresh(process, record);
            }
            data.agents.clone()
        })?)
    }

    pub fn agent(&self, agent_id: &str) -> Result<AgentRecord, SupervisorError> {
        self.list_agents()?
            .into_iter()
            .find(|a| a.agent_id == agent_id)
            .ok_or_else(|| SupervisorError::NotFound {
                id: agent_id.to_string(),
            })
    }

    /// SIGTERM a running agent and mark it `killed`
    pub async fn kill_agent(&self, agent_id: &str) -> Result<AgentRecord, SupervisorError> {
        let record = self.agent(agent_id)?;
        if record.status != AgentStatus::Running {
            return Err(SupervisorError::NotRunning {
                id: record.agent_id,
                status: record.status,
            });
        }

        self.process
            .terminate(record.pid)
            .await
            .map_err(|e| SupervisorError::KillFailed {
                id: agent_id.to_string(),
                reason: e.to_string(),
            })?;

        let updated = self.registry.update(|data| {
            data.find_mut(agent_id).map(|stored| {
                stored.transition(AgentStatus::Killed, None);
                stored.clone()
            })
        })?;

        info!(agent_id = %agent_id, pid = record.pid, "Agent killed");
        updated.ok_or_else(|| SupervisorError::NotFound {
            id: agent_id.to_string(),
        })
    }

    /// Kill every running agent; failures are collected, not fatal
    pub async fn kill_all(&self) -> Result<KillAllReport, SupervisorError> {
        let mut report = KillAllReport::default();
        let running: Vec<String> = self
            .list_agents()?
            .into_iter()
            .filter(|a| a.status == AgentStatus::Running)
            .map(|a| a.agent_id)
            .collect();

        for agent_id in running {
            match self.kill_agent(&agent_id).await {
                Ok(_) => report.killed.push(agent_id),
                // Ended on its own between listing and killing
                Err(SupervisorError::NotRunning { .. }) => {}
                Err(e) => report.failed.push((agent_id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Last `lines` lines of an agent's log
    pub fn log_tail(&self, record: &AgentRecord, lines: usize) -> std::io::Result<Vec<String>> {
        let file = match std::fs::File::open(&record.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let all: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].to_vec())
    }
}

fn refresh<P: ProcessControl + ?Sized>(process: &P, record: &mut AgentRecord) {
    if record.status != AgentStatus::Running {
        return;
    }
    if let Liveness::Exited { code } = process.liveness(record.pid) {
        let next = AgentStatus::ended_for(record.mode);
        if record.transition(next, code) {
            info!(agent_id = %record.agent_id, status = %next, ?code, "Agent ended");
        }
    }
}
