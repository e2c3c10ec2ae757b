use crate::protocol::{LockMode, MessageKind, Severity};
use clap::{Parser, Subcommand};

pub mod commands;

#[derive(Parser)]
#[command(name = "subagent")]
#[command(version)]
#[command(about = "Coordinate AI agent processes sharing one workspace")]
#[command(long_about = "subagent spawns helper agents as background processes and lets them share a \
                       project safely: a per-session broker arbitrates file and git locks and routes \
                       messages between agents. Get started with 'subagent spawn \"<task>\"'.")]
pub struct Cli {
    /// Session to operate on (defaults to SUBAGENT_SESSION or the current project)
    #[arg(long, global = true, help = "Session id; defaults to SUBAGENT_SESSION or one derived from the project directory")]
    pub session: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spawn a helper agent in the background
    Spawn {
        /// What the agent should do
        task: String,
        /// Model for the agent
        #[arg(long, help = "Model name handed to the runner (defaults to supervisor.default_model)")]
        model: Option<String>,
        /// Keep the agent alive to receive follow-up messages
        #[arg(long, help = "Keep polling for messages after the first run instead of exiting")]
        persistent: bool,
    },
    /// List spawned agents and their status
    List,
    /// Show one agent's record and the tail of its log
    Status {
        agent_id: String,
    },
    /// Terminate one agent
    Kill {
        agent_id: String,
    },
    /// Terminate every running agent
    Killall,
    /// Show held file locks and the git lock
    Locks,
    /// Show shared discoveries
    Discoveries,
    /// Show shared warnings
    Warnings,
    /// Read (and clear) pending messages
    Inbox,
    /// Send guidance to an agent
    Send {
        agent_id: String,
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Answer an agent's question
    Reply {
        agent_id: String,
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Message every agent in the session
    Broadcast {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Acquire a file lock
    Lock {
        path: String,
        #[arg(long, value_enum, default_value_t = LockMode::Write)]
        mode: LockMode,
    },
    /// Release a file lock
    Unlock {
        path: String,
    },
    /// Acquire the git commit lock
    GitLock,
    /// Release the git commit lock
    GitUnlock,
    /// Message the primary session
    Notify {
        #[arg(value_enum)]
        kind: MessageKind,
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Share a discovery with every agent
    Discover {
        category: String,
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    /// Raise a warning for every agent
    Warn {
        #[arg(value_enum)]
        severity: Severity,
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    /// Manage the session broker
    Broker {
        #[command(subcommand)]
        action: BrokerAction,
    },
    /// Print the effective configuration
    Config,
    /// Run as a spawned agent (used by `spawn`)
    #[command(hide = true)]
    Worker,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
pub enum BrokerAction {
    /// Start the broker in the background if it is not running
    Start,
    /// Stop the broker, discarding all locks and messages
    Stop,
    /// Show broker details
    Status,
    /// Run the broker in the foreground
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_message_words_are_collected() {
        let cli = Cli::parse_from(["subagent", "send", "agent-1", "use", "the", "new", "lexer"]);
        match cli.command {
            Some(Commands::Send { agent_id, message }) => {
                assert_eq!(agent_id, "agent-1");
                assert_eq!(message.join(" "), "use the new lexer");
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_session_flag_is_global() {
        let cli = Cli::parse_from(["subagent", "locks", "--session", "demo"]);
        assert_eq!(cli.session.as_deref(), Some("demo"));
    }

    #[test]
    fn test_lock_mode_defaults_to_write() {
        let cli = Cli::parse_from(["subagent", "lock", "src/x.rs"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Lock { mode: LockMode::Write, .. })
        ));
    }
}
