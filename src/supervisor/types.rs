use crate::identity::AgentMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a spawned agent. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    /// Oneshot agent finished on its own
    Exited,
    /// Persistent agent went away without being killed
    Stopped,
    /// Terminated by the supervisor
    Killed,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Running)
    }

    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        matches!(self, AgentStatus::Running) && next.is_terminal()
    }

    /// Terminal status for a process that ended without a kill
    pub fn ended_for(mode: AgentMode) -> Self {
        match mode {
            AgentMode::Oneshot => AgentStatus::Exited,
            AgentMode::Persistent => AgentStatus::Stopped,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AgentStatus::Running => "🟢",
            AgentStatus::Exited => "✅",
            AgentStatus::Stopped => "⏹️",
            AgentStatus::Killed => "💀",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Running => "running",
            AgentStatus::Exited => "exited",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Killed => "killed",
        };
        f.pad(label)
    }
}

/// Supervisor-owned record of one spawned agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub pid: u32,
    pub task: String,
    pub model: String,
    pub mode: AgentMode,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub log_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl AgentRecord {
    /// Move to `next` if allowed. Terminal states never change again.
    pub fn transition(&mut self, next: AgentStatus, exit_code: Option<i32>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.ended_at = Some(Utc::now());
        self.exit_code = exit_code;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: AgentMode) -> AgentRecord {
        AgentRecord {
            agent_id: "agent-1".to_string(),
            pid: 100,
            task: "t".to_string(),
            model: "m".to_string(),
            mode,
            status: AgentStatus::Running,
            started_at: Utc::now(),
            log_path: PathBuf::from("/tmp/agent-1.log"),
            ended_at: None,
            exit_code: None,
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut agent = record(AgentMode::Oneshot);
        assert!(agent.transition(AgentStatus::Killed, None));
        assert!(!agent.transition(AgentStatus::Exited, Some(0)));
        assert_eq!(agent.status, AgentStatus::Killed);
        assert!(agent.ended_at.is_some());
    }

    #[test]
    fn test_running_is_not_a_transition_target() {
        let mut agent = record(AgentMode::Oneshot);
        assert!(!agent.transition(AgentStatus::Running, None));
        assert!(agent.ended_at.is_none());
    }

    #[test]
    fn test_natural_end_depends_on_mode() {
        assert_eq!(AgentStatus::ended_for(AgentMode::Oneshot), AgentStatus::Exited);
        assert_eq!(AgentStatus::ended_for(AgentMode::Persistent), AgentStatus::Stopped);
    }
}
