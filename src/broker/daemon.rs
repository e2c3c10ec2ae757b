//! Detached background processes: the broker itself and spawned workers.

use crate::config::SubagentConfig;
use crate::identity::{AGENT_ID_ENV, SUBAGENT_MARKER_ENV};
use crate::session::SessionPaths;
use anyhow::{bail, Context, Result};
use nix::sys::signal::{sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, info};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signals whose disposition a parent shell may have changed
const RESET_SIGNALS: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGPIPE,
];

/// Configure `command` to start fully detached from the caller.
///
/// In the child, before `exec`: new session and process group, empty signal
/// mask, default dispositions. stdin reads `/dev/null`; stdout and stderr
/// append to `log_path`.
pub fn detach(command: &mut Command, log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = open_log(log_path)?;
    let log_err = log.try_clone()?;

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    // SAFETY: the hook runs between fork and exec and only makes
    // async-signal-safe calls.
    unsafe {
        command.pre_exec(|| reset_process_state().map_err(io::Error::from));
    }
    Ok(())
}

/// Daemonize phase, run in the forked child before anything else
fn reset_process_state() -> nix::Result<()> {
    nix::unistd::setsid()?;
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
    for sig in RESET_SIGNALS {
        // SAFETY: installing SIG_DFL carries no handler code
        unsafe { nix::sys::signal::signal(sig, SigHandler::SigDfl)? };
    }
    Ok(())
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// True when something is accepting connections on the session socket
pub async fn broker_is_listening(paths: &SessionPaths, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, UnixStream::connect(&paths.socket)).await,
        Ok(Ok(_))
    )
}

/// Start a detached broker for the session unless one is already answering.
/// Returns `true` when this call started it.
pub async fn ensure_broker(paths: &SessionPaths, config: &SubagentConfig) -> Result<bool> {
    if broker_is_listening(paths, config.broker.connect_timeout()).await {
        debug!(session = %paths.id, "Broker already running");
        return Ok(false);
    }

    let pid = spawn_broker(paths)?;
    info!(session = %paths.id, pid, "Started broker");

    let deadline = tokio::time::Instant::now() + config.broker.startup_timeout();
    while tokio::time::Instant::now() < deadline {
        if broker_is_listening(paths, config.broker.connect_timeout()).await {
            return Ok(true);
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }

    bail!(
        "Broker for session {} did not come up within {}ms (see {})",
        paths.id,
        config.broker.startup_timeout_ms,
        paths.broker_log().display()
    )
}

fn spawn_broker(paths: &SessionPaths) -> Result<u32> {
    let exe = std::env::current_exe().context("locating the subagent executable")?;
    std::fs::create_dir_all(&paths.dir)
        .with_context(|| format!("creating session directory {}", paths.dir.display()))?;

    let mut command = Command::new(exe);
    command
        .arg("--session")
        .arg(paths.id.as_str())
        .args(["broker", "run"])
        .env_remove(SUBAGENT_MARKER_ENV)
        .env_remove(AGENT_ID_ENV);
    detach(&mut command, &paths.broker_log())
        .with_context(|| format!("preparing broker log {}", paths.broker_log().display()))?;

    spawn_reaped(command).context("spawning broker process")
}

/// Spawn `command` and collect its exit status in the background, so a broker
/// that dies while this process lives does not linger as a zombie.
fn spawn_reaped(command: Command) -> io::Result<u32> {
    let mut child = tokio::process::Command::from(command).spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "spawned process has no pid"))?;
    tokio::spawn(async move {
        if let Ok(status) = child.wait().await {
            debug!(pid, %status, "Background broker exited");
        }
    });
    Ok(pid)
}
