use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for subagent
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SubagentConfig {
    /// Broker transport settings
    pub broker: BrokerConfig,
    /// Process supervisor settings
    pub supervisor: SupervisorConfig,
    /// Worker harness settings
    pub worker: WorkerConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Directory holding session sockets (defaults to the system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<PathBuf>,
    /// How long a client waits for the socket to accept
    pub connect_timeout_ms: u64,
    /// How long a client waits for a single response
    pub request_timeout_ms: u64,
    /// How long `broker start` waits for a freshly spawned broker
    pub startup_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            startup_timeout_ms: 5_000,
        }
    }
}

impl BrokerConfig {
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Root for per-session logs and the agent registry
    pub state_dir: PathBuf,
    /// Model handed to agents spawned without --model
    pub default_model: String,
    /// Program launched for each agent (defaults to this executable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
    /// Log lines shown by `subagent status`
    pub status_tail_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".subagent"),
            default_model: "claude-sonnet-4-5".to_string(),
            worker_program: None,
            status_tail_lines: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command template running one unit of agent work.
    /// Placeholders: {task}, {model}, {agent_id}, {session}
    pub runner: Vec<String>,
    /// Inbox polling cadence for persistent agents
    pub poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner: vec![
                "claude".to_string(),
                "-p".to_string(),
                "{task}".to_string(),
                "--model".to_string(),
                "{model}".to_string(),
            ],
            poll_interval_secs: 5,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl SubagentConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (subagent.toml, .subagent-rc)
    /// 3. Environment variables (SUBAGENT__SECTION__KEY)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("subagent.toml").exists() {
            builder = builder.add_source(File::with_name("subagent"));
        }

        if Path::new(".subagent-rc").exists() {
            builder = builder.add_source(File::new(".subagent-rc", config::FileFormat::Toml));
        }

        // Double underscore keeps single-underscore keys like socket_dir intact
        // and stays clear of the SUBAGENT_* worker identity variables.
        builder = builder.add_source(
            Environment::with_prefix("SUBAGENT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::debug!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<SubagentConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = SubagentConfig::load_env_file();
        SubagentConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static SubagentConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable_without_any_file() {
        let config = SubagentConfig::default();
        assert_eq!(config.broker.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.supervisor.state_dir, PathBuf::from(".subagent"));
        assert!(config.worker.runner.iter().any(|arg| arg == "{task}"));
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let parsed: SubagentConfig = toml::from_str(
            r#"
            [broker]
            request_timeout_ms = 250

            [worker]
            runner = ["echo", "{task}"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.broker.request_timeout_ms, 250);
        assert_eq!(parsed.broker.connect_timeout_ms, 2_000);
        assert_eq!(parsed.worker.runner, vec!["echo", "{task}"]);
        assert_eq!(parsed.supervisor.status_tail_lines, 20);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let worker = WorkerConfig {
            poll_interval_secs: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(worker.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_effective_config_renders_as_toml() {
        let rendered = SubagentConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[broker]"));
        assert!(rendered.contains("default_model"));
    }
}
