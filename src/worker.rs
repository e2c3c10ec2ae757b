//! Worker harness: the process the supervisor launches for each agent.
//!
//! The harness owns the agent's broker connection and runs the configured
//! runner command for the actual work. Its stdout and stderr are the agent log.

use crate::client::{Client, ClientOptions};
use crate::config::SubagentConfig;
use crate::identity::{AgentEnv, AgentMode, USER_AGENT_ID};
use crate::protocol::{Message, MessageKind};
use crate::session::{SessionId, SessionPaths};
use crate::shutdown::wait_for_shutdown_signal;
use anyhow::{bail, Context, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Exit code of a oneshot worker whose runner never started
pub const RUNNER_UNAVAILABLE: i32 = 127;

/// How one runner invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunnerOutcome {
    Exited(i32),
    /// The command could not be rendered or launched
    Unavailable(String),
}

impl RunnerOutcome {
    /// Description of an unsuccessful run, `None` on exit code 0
    fn failure(self) -> Option<String> {
        match self {
            RunnerOutcome::Exited(0) => None,
            RunnerOutcome::Exited(code) => Some(format!("exit code {code}")),
            RunnerOutcome::Unavailable(reason) => Some(reason),
        }
    }
}

/// Run the agent described by the inherited environment; returns the exit code
pub async fn run_worker(config: &SubagentConfig) -> Result<i32> {
    let identity = AgentEnv::from_env()?;
    run_worker_with(identity, config).await
}

pub async fn run_worker_with(identity: AgentEnv, config: &SubagentConfig) -> Result<i32> {
    let session = SessionId::new(identity.session.clone())?;
    let paths = SessionPaths::from_config(session, config)?;

    let mut client = Client::new(
        &paths,
        &identity.agent_id,
        &identity.task,
        ClientOptions::from(&config.broker),
    )
    .await
    .with_context(|| format!("{} cannot reach the session broker", identity.agent_id))?;

    println!(
        "🤖 {} started ({}, model {})",
        identity.agent_id, identity.mode, identity.model
    );
    println!("📋 Task: {}", identity.task);
    client
        .send_message(
            USER_AGENT_ID,
            MessageKind::Status,
            &format!("{} started: {}", identity.agent_id, identity.task),
        )
        .await?;

    let outcome = run_runner(&config.worker.runner, &identity, &identity.task).await;

    match identity.mode {
        AgentMode::Oneshot => {
            let (code, kind, summary) = match outcome {
                RunnerOutcome::Exited(0) => (
                    0,
                    MessageKind::Complete,
                    format!("{} finished: {}", identity.agent_id, identity.task),
                ),
                RunnerOutcome::Exited(code) => (
                    code,
                    MessageKind::Blocked,
                    format!("{} failed with exit code {code}: {}", identity.agent_id, identity.task),
                ),
                RunnerOutcome::Unavailable(reason) => (
                    RUNNER_UNAVAILABLE,
                    MessageKind::Blocked,
                    format!("{} could not start its runner: {reason}", identity.agent_id),
                ),
            };
            client.send_message(USER_AGENT_ID, kind, &summary).await?;
            println!("🏁 Runner exited with code {code}");
            client.disconnect();
            Ok(code)
        }
        AgentMode::Persistent => {
            if let Some(failure) = outcome.failure() {
                warn!(agent_id = %identity.agent_id, %failure, "Initial run failed");
                client
                    .send_message(
                        USER_AGENT_ID,
                        MessageKind::Blocked,
                        &format!("{} initial run failed ({failure}); still listening", identity.agent_id),
                    )
                    .await?;
            }
            persistent_loop(&mut client, &identity, config).await?;
            client.disconnect();
            Ok(0)
        }
    }
}

async fn persistent_loop(client: &mut Client, identity: &AgentEnv, config: &SubagentConfig) -> Result<()> {
    let interval = config.worker.poll_interval();
    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    println!("👂 Waiting for messages every {}s", interval.as_secs());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(agent_id = %identity.agent_id, "Persistent agent stopping");
                println!("👋 Stopping");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let messages = client
            .poll_inbox()
            .await
            .context("lost contact with the session broker")?;
        for message in messages {
            println!("📨 #{} from {} ({})", message.id, message.from, message.kind);
            let prompt = message_prompt(identity, &message);
            let Some(failure) = run_runner(&config.worker.runner, identity, &prompt).await.failure() else {
                continue;
            };
            warn!(agent_id = %identity.agent_id, message_id = message.id, %failure, "Runner failed on message");
            client
                .send_message(
                    USER_AGENT_ID,
                    MessageKind::Blocked,
                    &format!("{} could not handle message #{} ({failure})", identity.agent_id, message.id),
                )
                .await?;
        }
    }
}

fn message_prompt(identity: &AgentEnv, message: &Message) -> String {
    format!(
        "{}\n\nMessage #{} from {} ({}): {}",
        identity.task, message.id, message.from, message.kind, message.content
    )
}

/// Substitute `{task}`, `{model}`, `{agent_id}` and `{session}` in the runner template
pub fn render_runner(template: &[String], identity: &AgentEnv, task: &str) -> Result<(String, Vec<String>)> {
    let rendered: Vec<String> = template
        .iter()
        .map(|arg| {
            arg.replace("{task}", task)
                .replace("{model}", &identity.model)
                .replace("{agent_id}", &identity.agent_id)
                .replace("{session}", &identity.session)
        })
        .collect();

    match rendered.split_first() {
        Some((program, args)) if !program.trim().is_empty() => Ok((program.clone(), args.to_vec())),
        _ => bail!("worker.runner is empty; configure the command that runs an agent"),
    }
}

async fn run_runner(template: &[String], identity: &AgentEnv, task: &str) -> RunnerOutcome {
    let (program, args) = match render_runner(template, identity, task) {
        Ok(rendered) => rendered,
        Err(e) => return RunnerOutcome::Unavailable(e.to_string()),
    };
    info!(agent_id = %identity.agent_id, program = %program, "Running agent runner");

    match Command::new(&program).args(&args).stdin(Stdio::null()).status().await {
        // Killed by a signal has no code
        Ok(status) => RunnerOutcome::Exited(status.code().unwrap_or(128)),
        Err(e) => {
            warn!(agent_id = %identity.agent_id, program = %program, error = %e, "Runner failed to start");
            RunnerOutcome::Unavailable(format!("failed to start runner '{program}': {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AgentEnv {
        AgentEnv {
            session: "proj-1".to_string(),
            agent_id: "agent-2".to_string(),
            task: "fix the parser".to_string(),
            model: "sonnet".to_string(),
            mode: AgentMode::Oneshot,
        }
    }

    #[test]
    fn test_render_runner_substitutes_placeholders() {
        let template: Vec<String> = ["claude", "-p", "{task}", "--model", "{model}", "--tag={agent_id}@{session}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (program, args) = render_runner(&template, &identity(), "fix the parser").unwrap();
        assert_eq!(program, "claude");
        assert_eq!(
            args,
            vec!["-p", "fix the parser", "--model", "sonnet", "--tag=agent-2@proj-1"]
        );
    }

    #[test]
    fn test_empty_runner_is_an_error() {
        assert!(render_runner(&[], &identity(), "x").is_err());
        assert!(render_runner(&["".to_string()], &identity(), "x").is_err());
    }

    #[tokio::test]
    async fn test_runner_exit_code_is_returned() {
        let template = vec!["sh".to_string(), "-c".to_string(), "exit 4".to_string()];
        assert_eq!(run_runner(&template, &identity(), "t").await, RunnerOutcome::Exited(4));
    }

    #[tokio::test]
    async fn test_missing_runner_is_unavailable_not_an_error() {
        let template = vec!["/nonexistent/agent-runner".to_string()];
        match run_runner(&template, &identity(), "t").await {
            RunnerOutcome::Unavailable(reason) => assert!(reason.contains("/nonexistent/agent-runner")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(
            run_runner(&[], &identity(), "t").await,
            RunnerOutcome::Unavailable(_)
        ));
    }

    #[test]
    fn test_message_prompt_keeps_original_task() {
        let message = Message {
            id: 7,
            from: "user".to_string(),
            to: "agent-2".to_string(),
            kind: MessageKind::Guidance,
            content: "use the new lexer".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let prompt = message_prompt(&identity(), &message);
        assert!(prompt.starts_with("fix the parser"));
        assert!(prompt.contains("#7 from user (guidance): use the new lexer"));
    }
}
