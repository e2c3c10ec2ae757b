use anyhow::Result;
use clap::Parser;
use subagent::cli::commands::agents::{KillAllCommand, KillCommand, ListCommand, SpawnCommand, StatusCommand};
use subagent::cli::commands::broker::BrokerCommand;
use subagent::cli::commands::config::ConfigCommand;
use subagent::cli::commands::journal::{DiscoverCommand, DiscoveriesCommand, WarnCommand, WarningsCommand};
use subagent::cli::commands::locks::{GitLockCommand, GitUnlockCommand, LockCommand, LocksCommand, UnlockCommand};
use subagent::cli::commands::messages::{InboxCommand, SendCommand};
use subagent::cli::commands::worker::WorkerCommand;
use subagent::cli::commands::{show_how_to_get_work, Command, CommandContext};
use subagent::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = subagent::config()?;
    subagent::init_telemetry(&config.observability)?;

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        // Default behavior: no subcommand - explain how to get started
        None => runtime.block_on(show_how_to_get_work()),
        Some(Commands::Worker) => {
            let code = runtime.block_on(WorkerCommand { config }.execute())?;
            drop(runtime);
            std::process::exit(code)
        }
        Some(command) => {
            let ctx = CommandContext::resolve(cli.session.as_deref(), config)?;
            runtime.block_on(dispatch(command, ctx))
        }
    }
}

async fn dispatch(command: Commands, ctx: CommandContext) -> Result<()> {
    match command {
        Commands::Spawn { task, model, persistent } => {
            SpawnCommand { ctx, task, model, persistent }.execute().await
        }
        Commands::List => ListCommand { ctx }.execute().await,
        Commands::Status { agent_id } => StatusCommand { ctx, agent_id }.execute().await,
        Commands::Kill { agent_id } => KillCommand { ctx, agent_id }.execute().await,
        Commands::Killall => KillAllCommand { ctx }.execute().await,
        Commands::Locks => LocksCommand { ctx }.execute().await,
        Commands::Discoveries => DiscoveriesCommand { ctx }.execute().await,
        Commands::Warnings => WarningsCommand { ctx }.execute().await,
        Commands::Inbox => InboxCommand { ctx }.execute().await,
        Commands::Send { agent_id, message } => SendCommand::send(ctx, agent_id, message).execute().await,
        Commands::Reply { agent_id, message } => SendCommand::reply(ctx, agent_id, message).execute().await,
        Commands::Broadcast { message } => SendCommand::broadcast(ctx, message).execute().await,
        Commands::Notify { kind, message } => SendCommand::notify(ctx, kind, message).execute().await,
        Commands::Lock { path, mode } => LockCommand { ctx, path, mode }.execute().await,
        Commands::Unlock { path } => UnlockCommand { ctx, path }.execute().await,
        Commands::GitLock => GitLockCommand { ctx }.execute().await,
        Commands::GitUnlock => GitUnlockCommand { ctx }.execute().await,
        Commands::Discover { category, content } => {
            DiscoverCommand { ctx, category, words: content }.execute().await
        }
        Commands::Warn { severity, content } => {
            WarnCommand { ctx, severity, words: content }.execute().await
        }
        Commands::Broker { action } => BrokerCommand { ctx, action }.execute().await,
        Commands::Config => ConfigCommand { ctx }.execute().await,
        // Handled before a session is resolved
        Commands::Worker => Ok(()),
    }
}
