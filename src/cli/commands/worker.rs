use crate::config::SubagentConfig;
use crate::worker::run_worker;
use anyhow::Result;

/// Hidden entry point for spawned agents. Returns the process exit code.
pub struct WorkerCommand<'a> {
    pub config: &'a SubagentConfig,
}

impl WorkerCommand<'_> {
    pub async fn execute(&self) -> Result<i32> {
        run_worker(self.config).await
    }
}
