use super::{Command, CommandContext};
use anyhow::Result;

pub struct ConfigCommand {
    pub ctx: CommandContext,
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        println!("# Effective configuration for session {}", self.ctx.paths.id);
        println!("# socket: {}", self.ctx.paths.socket.display());
        println!("# state:  {}", self.ctx.paths.dir.display());
        println!();
        print!("{}", self.ctx.config.to_toml()?);
        Ok(())
    }
}
