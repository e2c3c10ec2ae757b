// subagent library - multi-agent coordination broker
// This exposes the core components for testing and integration

pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

// Re-export key types for easy access
pub use broker::{ensure_broker, serve, BrokerState, LockTable, MailboxStore};
pub use client::{Client, ClientError, ClientOptions, LockOutcome, ReleaseReport, SendReceipt};
pub use config::{config, SubagentConfig};
pub use identity::{AgentEnv, AgentMode, ProcessEnv};
pub use protocol::{LockMode, Message, MessageKind, Request, Response, Severity, StatusSnapshot};
pub use session::{SessionId, SessionPaths};
pub use supervisor::{AgentRecord, AgentStatus, Supervisor, SupervisorError};
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
