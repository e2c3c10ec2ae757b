//! OS process control behind a mockable seam.

use crate::broker::detach;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

const REAP_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to start one detached worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub log_path: PathBuf,
}

/// What a liveness check found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Ended; the code is known only for children of this process
    Exited { code: Option<i32> },
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ProcessControl: Send + Sync {
    /// Start a detached process and return its pid
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<u32>;

    /// SIGTERM the process group led by `pid`
    async fn terminate(&self, pid: u32) -> io::Result<()>;

    fn liveness(&self, pid: u32) -> Liveness;
}

/// Real processes. Children started here are kept so they can be reaped.
#[derive(Debug, Default)]
pub struct OsProcessControl {
    children: Mutex<HashMap<u32, Child>>,
}

impl OsProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_reap(&self, pid: u32) -> Option<Liveness> {
        let mut children = self.children.lock().ok()?;
        let child = children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                children.remove(&pid);
                Some(Liveness::Exited {
                    code: status.code(),
                })
            }
            Ok(None) => Some(Liveness::Running),
            Err(e) => {
                warn!(pid, error = %e, "try_wait failed");
                None
            }
        }
    }

    fn take_child(&self, pid: u32) -> Option<Child> {
        self.children.lock().ok()?.remove(&pid)
    }
}

#[async_trait::async_trait]
impl ProcessControl for OsProcessControl {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<u32> {
        let mut command = std::process::Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        detach(&mut command, &spec.log_path)?;

        let child = Command::from(command).spawn()?;
        let pid = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "spawned process has no pid")
        })?;

        if let Ok(mut children) = self.children.lock() {
            children.insert(pid, child);
        }
        debug!(pid, program = %spec.program.display(), "Launched detached process");
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> io::Result<()> {
        if pid <= 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {pid}"),
            ));
        }

        let target = Pid::from_raw(pid as i32);
        match killpg(target, Signal::SIGTERM) {
            Ok(()) => {}
            // Not a group leader after all; signal the process itself
            Err(Errno::ESRCH) => kill(target, Signal::SIGTERM)?,
            Err(e) => return Err(e.into()),
        }

        if let Some(mut child) = self.take_child(pid) {
            if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                debug!(pid, "Process still running after SIGTERM grace period");
                if let Ok(mut children) = self.children.lock() {
                    children.insert(pid, child);
                }
            }
        }
        Ok(())
    }

    fn liveness(&self, pid: u32) -> Liveness {
        if let Some(seen) = self.try_reap(pid) {
            return seen;
        }
        if pid <= 1 {
            return Liveness::Exited { code: None };
        }

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) if is_zombie(pid) => Liveness::Exited { code: None },
            Ok(()) => Liveness::Running,
            Err(Errno::ESRCH) => Liveness::Exited { code: None },
            // Exists but belongs to someone else
            Err(Errno::EPERM) => Liveness::Running,
            Err(e) => {
                warn!(pid, error = %e, "Liveness check failed");
                Liveness::Running
            }
        }
    }
}

/// A zombie has exited; only its parent has not collected it yet
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let after_comm = &stat[stat.rfind(')')? + 1..];
            after_comm.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str, temp: &TempDir) -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![("GREETING".to_string(), "hello".to_string())],
            log_path: temp.path().join("logs").join("proc.log"),
        }
    }

    async fn wait_for_exit(control: &OsProcessControl, pid: u32) -> Liveness {
        for _ in 0..100 {
            let seen = control.liveness(pid);
            if seen != Liveness::Running {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Liveness::Running
    }

    #[tokio::test]
    async fn test_exit_code_of_own_child_is_reported() {
        let temp = TempDir::new().unwrap();
        let control = OsProcessControl::new();
        let spec = shell("echo $GREETING; exit 3", &temp);
        let pid = control.launch(&spec).await.unwrap();

        assert_eq!(
            wait_for_exit(&control, pid).await,
            Liveness::Exited { code: Some(3) }
        );
        let log = std::fs::read_to_string(&spec.log_path).unwrap();
        assert!(log.contains("hello"));
    }

    #[tokio::test]
    async fn test_terminate_stops_process_group() {
        let temp = TempDir::new().unwrap();
        let control = OsProcessControl::new();
        let pid = control.launch(&shell("sleep 30", &temp)).await.unwrap();
        assert_eq!(control.liveness(pid), Liveness::Running);

        control.terminate(pid).await.unwrap();
        assert!(matches!(
            wait_for_exit(&control, pid).await,
            Liveness::Exited { .. }
        ));
    }

    #[tokio::test]
    async fn test_refuses_to_signal_init() {
        let control = OsProcessControl::new();
        assert!(control.terminate(1).await.is_err());
        assert!(control.terminate(0).await.is_err());
    }

    #[test]
    fn test_unknown_pid_is_not_running() {
        let control = OsProcessControl::new();
        // Far above any pid_max
        assert_eq!(
            control.liveness(999_999_999),
            Liveness::Exited { code: None }
        );
    }
}
