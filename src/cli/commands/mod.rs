use crate::broker::ensure_broker;
use crate::client::{Client, ClientError, ClientOptions};
use crate::config::SubagentConfig;
use crate::identity::current_agent_id;
use crate::session::{SessionId, SessionPaths};
use anyhow::{anyhow, Result};

pub mod agents;
pub mod broker;
pub mod config;
pub mod journal;
pub mod locks;
pub mod messages;
pub mod worker;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Session, configuration and caller identity shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: SubagentConfig,
    pub paths: SessionPaths,
    pub agent_id: String,
}

impl CommandContext {
    pub fn resolve(session: Option<&str>, config: &SubagentConfig) -> Result<Self> {
        let id = SessionId::resolve(session)?;
        let paths = SessionPaths::from_config(id, config)?;
        Ok(Self {
            config: config.clone(),
            paths,
            agent_id: current_agent_id(),
        })
    }

    /// Connect to a broker that must already be running
    pub async fn connect(&self) -> Result<Client> {
        match Client::new(
            &self.paths,
            &self.agent_id,
            "",
            ClientOptions::from(&self.config.broker),
        )
        .await
        {
            Ok(client) => Ok(client),
            Err(e @ ClientError::Unreachable { .. }) => {
                println!("❌ Broker unreachable for session {}", self.paths.id);
                println!("   Coordination state is unknown; nothing can be read.");
                println!("   💡 Start it with: subagent broker start");
                Err(anyhow!(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect, starting the broker in the background on first use
    pub async fn connect_or_start(&self) -> Result<Client> {
        if ensure_broker(&self.paths, &self.config).await? {
            println!("🚀 Started broker for session {}", self.paths.id);
        }
        self.connect().await
    }
}

/// Join trailing words back into one message
pub fn join_words(words: &[String]) -> String {
    words.join(" ")
}

pub async fn show_how_to_get_work() -> Result<()> {
    println!("🎯 subagent - coordinate AI agents in one workspace");
    println!();
    println!("Primary session:");
    println!("  🚀 subagent spawn \"<task>\"        # Start a helper agent");
    println!("  📋 subagent list                   # See agents and their status");
    println!("  📬 subagent inbox                  # Read messages from agents");
    println!("  💬 subagent send <agent> <msg>     # Give an agent guidance");
    println!("  🔒 subagent locks                  # Who holds which files");
    println!();
    println!("Inside an agent:");
    println!("  🔐 subagent lock <path>            # Claim a file before editing");
    println!("  📣 subagent notify question <msg>  # Ask the primary session");
    println!();
    println!("💡 Start with 'subagent spawn' to hand off your first task!");
    Ok(())
}
