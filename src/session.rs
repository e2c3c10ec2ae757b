//! Session naming and on-disk layout.
//!
//! One broker serves one session. The session id keys the rendezvous socket and
//! the state directory holding logs and the supervisor's agent registry.

use crate::config::SubagentConfig;
use crate::identity::SESSION_ENV;
use sha2::{Digest, Sha256};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_SESSION_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id '{id}': {reason}")]
    InvalidId { id: String, reason: String },
    #[error("cannot determine the working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

/// Validated session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, SessionError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidId {
                reason: format!("must be 1-{MAX_SESSION_ID_LEN} characters"),
                id,
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(SessionError::InvalidId {
                reason: format!("character '{bad}' is not allowed"),
                id,
            });
        }
        if id.starts_with('.') {
            return Err(SessionError::InvalidId {
                reason: "must not start with '.'".to_string(),
                id,
            });
        }
        Ok(Self(id))
    }

    /// Resolve the session for this process: explicit flag, then the
    /// inherited environment, then the enclosing project directory.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, SessionError> {
        if let Some(id) = explicit {
            return Self::new(id);
        }
        if let Ok(id) = std::env::var(SESSION_ENV) {
            if !id.is_empty() {
                return Self::new(id);
            }
        }
        let cwd = std::env::current_dir()?;
        Ok(Self::for_project(&project_root(&cwd)))
    }

    /// Derive an id from a project directory. The suffix is a SHA-256 prefix
    /// of the path bytes, so every build agrees on it.
    pub fn for_project(root: &Path) -> Self {
        let name: String = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(40)
            .collect();

        let digest = Sha256::digest(root.as_os_str().as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();

        Self(format!("{name}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Work tree of the enclosing git repository, or `dir` itself
fn project_root(dir: &Path) -> PathBuf {
    match git2::Repository::discover(dir) {
        Ok(repo) => repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf()),
        Err(_) => dir.to_path_buf(),
    }
}

/// Filesystem locations belonging to one session
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub id: SessionId,
    pub socket: PathBuf,
    pub broker_lock: PathBuf,
    pub dir: PathBuf,
}

impl SessionPaths {
    pub fn new(id: SessionId, socket_dir: &Path, state_dir: &Path) -> Self {
        let socket = socket_dir.join(format!("subagent-{}.sock", id));
        let broker_lock = socket_dir.join(format!("subagent-{}.lock", id));
        let dir = state_dir.join("sessions").join(id.as_str());
        Self {
            id,
            socket,
            broker_lock,
            dir,
        }
    }

    pub fn from_config(id: SessionId, config: &SubagentConfig) -> Result<Self, SessionError> {
        let cwd = std::env::current_dir()?;
        let state_dir = state_dir_for(&config.supervisor.state_dir, &cwd);
        Ok(Self::new(id, &config.broker.socket_dir(), &state_dir))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn agent_log(&self, agent_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{agent_id}.log"))
    }

    pub fn broker_log(&self) -> PathBuf {
        self.dir.join("broker.log")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.dir.join("agents.json")
    }

    pub fn registry_lock(&self) -> PathBuf {
        self.dir.join("agents.lock")
    }
}

/// A relative state directory hangs off the project root, so every
/// subdirectory of one repository shares the same registry and logs.
fn state_dir_for(configured: &Path, cwd: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        project_root(cwd).join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::new("proj-1a2b3c4d").is_ok());
        assert!(SessionId::new("a.b_c").is_ok());
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("../escape").is_err());
        assert!(SessionId::new(".hidden").is_err());
        assert!(SessionId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_project_derived_id_is_stable_and_valid() {
        let root = Path::new("/home/dev/my project");
        let first = SessionId::for_project(root);
        let second = SessionId::for_project(root);
        assert_eq!(first, second);
        assert!(first.as_str().starts_with("my_project-"));
        assert!(SessionId::new(first.as_str()).is_ok());

        let other = SessionId::for_project(Path::new("/srv/my project"));
        assert_ne!(first, other);
    }

    #[test]
    fn test_project_derived_id_does_not_depend_on_the_build() {
        // First four bytes of SHA-256("/home/dev/my project")
        let id = SessionId::for_project(Path::new("/home/dev/my project"));
        assert_eq!(id.as_str(), "my_project-aaeeac88");
    }

    #[test]
    fn test_project_root_prefers_git_workdir() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init(temp.path()).unwrap();
        let nested = temp.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let root = project_root(&nested);
        assert_eq!(
            root.canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_relative_state_dir_is_anchored_at_project_root() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init(temp.path()).unwrap();
        let nested = temp.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let from_root = state_dir_for(Path::new(".subagent"), temp.path());
        let from_nested = state_dir_for(Path::new(".subagent"), &nested);
        assert_eq!(from_root, from_nested);
        assert_eq!(
            from_nested.parent().unwrap().canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );

        let absolute = temp.path().join("elsewhere");
        assert_eq!(state_dir_for(&absolute, &nested), absolute);
    }

    #[test]
    fn test_session_paths_layout() {
        let id = SessionId::new("demo").unwrap();
        let paths = SessionPaths::new(id, Path::new("/tmp"), Path::new("/work/.subagent"));
        assert_eq!(paths.socket, PathBuf::from("/tmp/subagent-demo.sock"));
        assert_eq!(paths.broker_lock, PathBuf::from("/tmp/subagent-demo.lock"));
        assert_eq!(
            paths.agent_log("agent-2"),
            PathBuf::from("/work/.subagent/sessions/demo/logs/agent-2.log")
        );
        assert_eq!(
            paths.registry_file(),
            PathBuf::from("/work/.subagent/sessions/demo/agents.json")
        );
    }
}
