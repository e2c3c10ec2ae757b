//! Process identity: who is this process inside a coordination session?
//!
//! Spawned workers inherit their identity through environment variables set by
//! the supervisor. The same variables carry the sub-agent marker that the
//! fork-bomb guard inspects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker inherited by every spawned agent process.
pub const SUBAGENT_MARKER_ENV: &str = "SUBAGENT_IS_AGENT";
pub const SESSION_ENV: &str = "SUBAGENT_SESSION";
pub const AGENT_ID_ENV: &str = "SUBAGENT_AGENT_ID";
pub const TASK_ENV: &str = "SUBAGENT_TASK";
pub const MODEL_ENV: &str = "SUBAGENT_MODEL";
pub const MODE_ENV: &str = "SUBAGENT_MODE";

/// Reserved identity of the primary interactive session.
pub const USER_AGENT_ID: &str = "user";

/// Sentinel recipient that fans a message out to every mailbox.
pub const BROADCAST_TARGET: &str = "all";

/// Lifecycle mode of a spawned agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Runs its task once and exits
    Oneshot,
    /// Stays alive and polls its mailbox until killed
    Persistent,
}

impl AgentMode {
    pub fn from_persistent_flag(persistent: bool) -> Self {
        if persistent {
            AgentMode::Persistent
        } else {
            AgentMode::Oneshot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Oneshot => "oneshot",
            AgentMode::Persistent => "persistent",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oneshot" => Ok(AgentMode::Oneshot),
            "persistent" => Ok(AgentMode::Persistent),
            other => Err(format!("unknown agent mode '{other}'")),
        }
    }
}

/// Snapshot of the spawn-relevant process environment.
///
/// Captured once so the guard decision does not depend on when it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEnv {
    is_subagent: bool,
}

impl ProcessEnv {
    pub fn current() -> Self {
        Self {
            is_subagent: std::env::var_os(SUBAGENT_MARKER_ENV).is_some(),
        }
    }

    pub fn primary() -> Self {
        Self { is_subagent: false }
    }

    pub fn subagent() -> Self {
        Self { is_subagent: true }
    }

    pub fn is_subagent(&self) -> bool {
        self.is_subagent
    }
}

/// Identity used by CLI commands when talking to the broker
pub fn current_agent_id() -> String {
    std::env::var(AGENT_ID_ENV)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| USER_AGENT_ID.to_string())
}

/// Identity handed to a worker process by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEnv {
    pub session: String,
    pub agent_id: String,
    pub task: String,
    pub model: String,
    pub mode: AgentMode,
}

impl AgentEnv {
    /// Environment pairs the supervisor sets on the child, marker included.
    pub fn to_env_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (SUBAGENT_MARKER_ENV, "1".to_string()),
            (SESSION_ENV, self.session.clone()),
            (AGENT_ID_ENV, self.agent_id.clone()),
            (TASK_ENV, self.task.clone()),
            (MODEL_ENV, self.model.clone()),
            (MODE_ENV, self.mode.as_str().to_string()),
        ]
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("worker environment is missing {key}"))
        };

        let mode = required(MODE_ENV)?
            .parse::<AgentMode>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self {
            session: required(SESSION_ENV)?,
            agent_id: required(AGENT_ID_ENV)?,
            task: required(TASK_ENV)?,
            model: required(MODEL_ENV)?,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_agent_env_round_trips_through_env_pairs() {
        let env = AgentEnv {
            session: "proj-1234abcd".to_string(),
            agent_id: "agent-3".to_string(),
            task: "fix the parser".to_string(),
            model: "sonnet".to_string(),
            mode: AgentMode::Persistent,
        };

        let pairs: HashMap<&str, String> = env.to_env_pairs().into_iter().collect();
        assert_eq!(pairs.get(SUBAGENT_MARKER_ENV).map(String::as_str), Some("1"));

        let parsed = AgentEnv::from_lookup(|key| pairs.get(key).cloned()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_agent_env_reports_missing_variable() {
        let err = AgentEnv::from_lookup(|key| {
            if key == MODE_ENV {
                Some("oneshot".to_string())
            } else {
                None
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains(SESSION_ENV));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("oneshot".parse::<AgentMode>().unwrap(), AgentMode::Oneshot);
        assert_eq!(
            AgentMode::from_persistent_flag(true),
            AgentMode::Persistent
        );
        assert!("forever".parse::<AgentMode>().is_err());
    }
}
