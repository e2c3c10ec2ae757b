use super::{join_words, Command, CommandContext};
use crate::protocol::Severity;
use anyhow::Result;

pub struct DiscoveriesCommand {
    pub ctx: CommandContext,
}

impl Command for DiscoveriesCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let discoveries = client.get_discoveries().await?;
        client.disconnect();

        if discoveries.is_empty() {
            println!("💡 No discoveries recorded yet");
            return Ok(());
        }
        println!("💡 DISCOVERIES ({})", discoveries.len());
        for discovery in &discoveries {
            println!(
                "   [{}] {} ({}): {}",
                discovery.timestamp.format("%H:%M:%S"),
                discovery.category,
                discovery.agent_id,
                discovery.content
            );
        }
        Ok(())
    }
}

pub struct WarningsCommand {
    pub ctx: CommandContext,
}

impl Command for WarningsCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let warnings = client.get_warnings().await?;
        client.disconnect();

        if warnings.is_empty() {
            println!("✅ No warnings recorded");
            return Ok(());
        }
        println!("⚠️  WARNINGS ({})", warnings.len());
        for warning in &warnings {
            println!(
                "   {} [{}] {} ({}): {}",
                severity_emoji(warning.severity),
                warning.timestamp.format("%H:%M:%S"),
                warning.severity,
                warning.agent_id,
                warning.content
            );
        }
        Ok(())
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "🔵",
        Severity::Medium => "🟡",
        Severity::High => "🟠",
        Severity::Critical => "🔴",
    }
}

pub struct DiscoverCommand {
    pub ctx: CommandContext,
    pub category: String,
    pub words: Vec<String>,
}

impl Command for DiscoverCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        client
            .record_discovery(&self.category, &join_words(&self.words))
            .await?;
        client.disconnect();
        println!("💡 Discovery recorded under '{}'", self.category);
        Ok(())
    }
}

pub struct WarnCommand {
    pub ctx: CommandContext,
    pub severity: Severity,
    pub words: Vec<String>,
}

impl Command for WarnCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        client
            .record_warning(self.severity, &join_words(&self.words))
            .await?;
        client.disconnect();
        println!("{} {} warning recorded", severity_emoji(self.severity), self.severity);
        Ok(())
    }
}
