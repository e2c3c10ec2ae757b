use super::{Command, CommandContext};
use crate::client::{Client, ClientOptions};
use crate::supervisor::{AgentRecord, Supervisor, SupervisorError};
use anyhow::Result;
use tracing::warn;

pub struct SpawnCommand {
    pub ctx: CommandContext,
    pub task: String,
    pub model: Option<String>,
    pub persistent: bool,
}

impl Command for SpawnCommand {
    async fn execute(&self) -> Result<()> {
        let supervisor = Supervisor::new(self.ctx.paths.clone(), &self.ctx.config)?;

        // Refuse before the broker is touched
        if let Err(e) = supervisor.spawn_guard() {
            println!("🚫 {e}");
            return Err(e.into());
        }

        self.ctx.connect_or_start().await?.disconnect();

        match supervisor
            .spawn_agent(&self.task, self.model.as_deref(), self.persistent)
            .await
        {
            Ok(agent) => {
                self.register_mailbox(&agent).await;
                println!("🚀 Spawned {} (pid {}, {})", agent.agent_id, agent.pid, agent.mode);
                println!("   📋 Task: {}", agent.task);
                println!("   🧠 Model: {}", agent.model);
                println!("   📄 Log: {}", agent.log_path.display());
                println!();
                println!("💡 Check on it with 'subagent status {}'", agent.agent_id);
                Ok(())
            }
            Err(e) => {
                println!("❌ Failed to spawn agent: {e}");
                Err(e.into())
            }
        }
    }
}

impl SpawnCommand {
    /// Open the new agent's mailbox now so guidance sent before its worker
    /// connects is queued rather than refused.
    async fn register_mailbox(&self, agent: &AgentRecord) {
        let options = ClientOptions::from(&self.ctx.config.broker);
        match Client::new(&self.ctx.paths, &agent.agent_id, &agent.task, options).await {
            Ok(client) => client.disconnect(),
            Err(e) => warn!(agent_id = %agent.agent_id, error = %e, "Could not register mailbox for new agent"),
        }
    }
}

pub struct ListCommand {
    pub ctx: CommandContext,
}

impl Command for ListCommand {
    async fn execute(&self) -> Result<()> {
        let supervisor = Supervisor::new(self.ctx.paths.clone(), &self.ctx.config)?;
        let agents = supervisor.list_agents()?;

        if agents.is_empty() {
            println!("📋 No agents spawned in session {}", self.ctx.paths.id);
            println!("   💡 Spawn one with: subagent spawn \"<task>\"");
            return Ok(());
        }

        println!("🤖 AGENTS ({}) in session {}", agents.len(), self.ctx.paths.id);
        println!("═══════════════════════════════════════");
        for agent in &agents {
            println!(
                "{} {:<10} {:<8} pid {:<7} {:<10} {}",
                agent.status.emoji(),
                agent.agent_id,
                agent.status,
                agent.pid,
                agent.mode,
                truncate(&agent.task, 60)
            );
        }
        let running = agents.iter().filter(|a| !a.status.is_terminal()).count();
        println!();
        println!("📊 {running} running, {} finished", agents.len() - running);
        Ok(())
    }
}

pub struct StatusCommand {
    pub ctx: CommandContext,
    pub agent_id: String,
}

impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        let supervisor = Supervisor::new(self.ctx.paths.clone(), &self.ctx.config)?;
        let agent = match supervisor.agent(&self.agent_id) {
            Ok(agent) => agent,
            Err(e @ SupervisorError::NotFound { .. }) => {
                println!("❌ Agent {} not found in session {}", self.agent_id, self.ctx.paths.id);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        print_record(&agent);

        let lines = supervisor.log_tail(&agent, self.ctx.config.supervisor.status_tail_lines)?;
        println!();
        if lines.is_empty() {
            println!("📄 Log is empty");
        } else {
            println!("📄 Last {} log line(s):", lines.len());
            for line in lines {
                println!("   {line}");
            }
        }
        Ok(())
    }
}

fn print_record(agent: &AgentRecord) {
    println!("{} {} is {}", agent.status.emoji(), agent.agent_id, agent.status);
    println!("   📋 Task: {}", agent.task);
    println!("   🧠 Model: {}", agent.model);
    println!("   🔁 Mode: {}", agent.mode);
    println!("   🔢 PID: {}", agent.pid);
    println!("   🕐 Started: {}", agent.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(ended) = agent.ended_at {
        println!("   🏁 Ended: {}", ended.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(code) = agent.exit_code {
        println!("   🔚 Exit code: {code}");
    }
    println!("   📄 Log: {}", agent.log_path.display());
}

pub struct KillCommand {
    pub ctx: CommandContext,
    pub agent_id: String,
}

impl Command for KillCommand {
    async fn execute(&self) -> Result<()> {
        let supervisor = Supervisor::new(self.ctx.paths.clone(), &self.ctx.config)?;
        match supervisor.kill_agent(&self.agent_id).await {
            Ok(agent) => {
                println!("💀 Killed {} (pid {})", agent.agent_id, agent.pid);
                Ok(())
            }
            Err(e @ SupervisorError::NotFound { .. }) => {
                println!("❌ Agent {} not found in session {}", self.agent_id, self.ctx.paths.id);
                Err(e.into())
            }
            Err(e) => {
                println!("❌ {e}");
                Err(e.into())
            }
        }
    }
}

pub struct KillAllCommand {
    pub ctx: CommandContext,
}

impl Command for KillAllCommand {
    async fn execute(&self) -> Result<()> {
        let supervisor = Supervisor::new(self.ctx.paths.clone(), &self.ctx.config)?;
        let report = supervisor.kill_all().await?;

        if report.killed.is_empty() && report.failed.is_empty() {
            println!("📋 No running agents");
            return Ok(());
        }
        for agent_id in &report.killed {
            println!("💀 Killed {agent_id}");
        }
        for (agent_id, reason) in &report.failed {
            println!("❌ Could not kill {agent_id}: {reason}");
        }
        println!();
        println!("📊 Terminated {} agent(s)", report.killed.len());

        if !report.failed.is_empty() {
            anyhow::bail!("{} agent(s) could not be killed", report.failed.len());
        }
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
