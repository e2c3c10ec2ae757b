use super::{Command, CommandContext};
use crate::client::LockOutcome;
use crate::protocol::LockMode;
use anyhow::{bail, Result};
use chrono::Utc;

pub struct LocksCommand {
    pub ctx: CommandContext,
}

impl Command for LocksCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let status = client.get_status().await?;
        client.disconnect();

        println!("🔒 LOCKS in session {}", status.broker.session);
        println!("═══════════════════════════════════════");
        match &status.git_lock {
            Some(git) => println!("🌿 git: held by {} ({})", git.owner, age(git.acquired_at)),
            None => println!("🌿 git: free"),
        }

        if status.file_locks.is_empty() {
            println!("📂 No file locks held");
        } else {
            println!("📂 {} file lock(s):", status.file_locks.len());
            for lock in &status.file_locks {
                println!(
                    "   {} {:<5} {} ({})",
                    lock.owner,
                    lock.mode,
                    lock.path,
                    age(lock.acquired_at)
                );
            }
        }
        Ok(())
    }
}

fn age(since: chrono::DateTime<Utc>) -> String {
    let seconds = (Utc::now() - since).num_seconds().max(0);
    match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3599 => format!("{}m ago", seconds / 60),
        _ => format!("{}h{}m ago", seconds / 3600, (seconds % 3600) / 60),
    }
}

pub struct LockCommand {
    pub ctx: CommandContext,
    pub path: String,
    pub mode: LockMode,
}

impl Command for LockCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let outcome = client.acquire_file_lock(&self.path, self.mode).await?;
        client.disconnect();

        match outcome {
            LockOutcome::Granted => {
                println!("🔐 {} lock on {} granted to {}", self.mode, self.path, self.ctx.agent_id);
                Ok(())
            }
            LockOutcome::Denied { holder } => {
                println!("⛔ {} is locked by {holder}; retry later", self.path);
                bail!("lock on {} denied: held by {holder}", self.path)
            }
        }
    }
}

pub struct UnlockCommand {
    pub ctx: CommandContext,
    pub path: String,
}

impl Command for UnlockCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let report = client.release_file_lock(&self.path).await?;
        client.disconnect();

        if report.released {
            println!("🔓 Released {}", self.path);
        } else {
            println!(
                "⚠️  Nothing released: {}",
                report.note.as_deref().unwrap_or("not held by you")
            );
        }
        Ok(())
    }
}

pub struct GitLockCommand {
    pub ctx: CommandContext,
}

impl Command for GitLockCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let outcome = client.acquire_git_lock().await?;
        client.disconnect();

        match outcome {
            LockOutcome::Granted => {
                println!("🌿 Git lock granted to {}", self.ctx.agent_id);
                Ok(())
            }
            LockOutcome::Denied { holder } => {
                println!("⛔ Git is locked by {holder}; retry later");
                bail!("git lock denied: held by {holder}")
            }
        }
    }
}

pub struct GitUnlockCommand {
    pub ctx: CommandContext,
}

impl Command for GitUnlockCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let report = client.release_git_lock().await?;
        client.disconnect();

        if report.released {
            println!("🔓 Released git lock");
        } else {
            println!(
                "⚠️  Nothing released: {}",
                report.note.as_deref().unwrap_or("not held by you")
            );
        }
        Ok(())
    }
}
