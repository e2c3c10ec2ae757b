use super::{Command, CommandContext};
use crate::broker::{ensure_broker, serve};
use crate::cli::BrokerAction;
use crate::client::{Client, ClientError, ClientOptions};
use crate::shutdown::wait_for_shutdown_signal;
use anyhow::Result;

pub struct BrokerCommand {
    pub ctx: CommandContext,
    pub action: BrokerAction,
}

impl Command for BrokerCommand {
    async fn execute(&self) -> Result<()> {
        match self.action {
            BrokerAction::Run => self.run().await,
            BrokerAction::Start => self.start().await,
            BrokerAction::Stop => self.stop().await,
            BrokerAction::Status => self.status().await,
        }
    }
}

impl BrokerCommand {
    async fn run(&self) -> Result<()> {
        serve(self.ctx.paths.clone(), wait_for_shutdown_signal()).await
    }

    async fn start(&self) -> Result<()> {
        let started = ensure_broker(&self.ctx.paths, &self.ctx.config).await?;
        if started {
            println!("🚀 Broker started for session {}", self.ctx.paths.id);
        } else {
            println!("✅ Broker already running for session {}", self.ctx.paths.id);
        }
        println!("   🔌 Socket: {}", self.ctx.paths.socket.display());
        println!("   📄 Log: {}", self.ctx.paths.broker_log().display());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Stopping must not register a mailbox on the way out
        let client = Client::connect(
            &self.ctx.paths.socket,
            self.ctx.paths.id.as_str(),
            &self.ctx.agent_id,
            ClientOptions::from(&self.ctx.config.broker),
        )
        .await;

        match client {
            Ok(mut client) => {
                client.shutdown_broker().await?;
                println!("🛑 Broker for session {} stopped", self.ctx.paths.id);
                println!("   All locks and pending messages were discarded.");
                Ok(())
            }
            Err(ClientError::Unreachable { .. }) => {
                println!("ℹ️  No broker running for session {}", self.ctx.paths.id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn status(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let status = client.get_status().await?;
        client.disconnect();

        let uptime = (chrono::Utc::now() - status.broker.started_at).num_seconds().max(0);
        println!("🟢 Broker for session {}", status.broker.session);
        println!("   🔢 PID: {} on {}", status.broker.pid, status.broker.hostname);
        println!(
            "   🕐 Up since {} ({uptime}s)",
            status.broker.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("   🔌 Socket: {}", self.ctx.paths.socket.display());
        println!(
            "   🔒 {} file lock(s), git {}",
            status.file_locks.len(),
            status
                .git_lock
                .as_ref()
                .map(|g| format!("held by {}", g.owner))
                .unwrap_or_else(|| "free".to_string())
        );
        println!("   📬 Mailboxes:");
        for agent in &status.agents {
            println!(
                "      {:<12} {} pending{}",
                agent.agent_id,
                agent.pending_messages,
                if agent.task.is_empty() {
                    String::new()
                } else {
                    format!(" - {}", agent.task)
                }
            );
        }
        Ok(())
    }
}
