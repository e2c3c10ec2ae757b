//! On-disk agent registry shared by every CLI invocation of a session.

use super::types::AgentRecord;
use crate::session::SessionPaths;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("agent registry {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryData {
    /// Last number handed out as `agent-N`
    #[serde(default)]
    pub last_id: u64,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
}

impl RegistryData {
    pub fn allocate_id(&mut self) -> String {
        self.last_id += 1;
        format!("agent-{}", self.last_id)
    }

    pub fn find_mut(&mut self, agent_id: &str) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|a| a.agent_id == agent_id)
    }
}

/// JSON file guarded by an exclusive `fd-lock` on a sibling lock file
#[derive(Debug, Clone)]
pub struct Registry {
    file: PathBuf,
    lock: PathBuf,
}

impl Registry {
    pub fn new(paths: &SessionPaths) -> Self {
        Self {
            file: paths.registry_file(),
            lock: paths.registry_lock(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Snapshot without modifying anything
    pub fn load(&self) -> Result<RegistryData, RegistryError> {
        let lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.read()?;
        self.read_data()
    }

    /// Read-modify-write under the exclusive lock
    pub fn update<T, F>(&self, apply: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut RegistryData) -> T,
    {
        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write()?;

        let mut data = self.read_data()?;
        let before = data.clone();
        let result = apply(&mut data);
        if data != before {
            self.write_data(&data)?;
        }
        Ok(result)
    }

    fn open_lock_file(&self) -> Result<File, RegistryError> {
        if let Some(parent) = self.lock.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock)?)
    }

    fn read_data(&self) -> Result<RegistryData, RegistryError> {
        match std::fs::read(&self.file) {
            Ok(bytes) if bytes.is_empty() => Ok(RegistryData::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
                path: self.file.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryData::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_data(&self, data: &RegistryData) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(data).map_err(|source| RegistryError::Corrupt {
            path: self.file.clone(),
            source,
        })?;
        let tmp = self.file.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AgentMode;
    use crate::session::SessionId;
    use crate::supervisor::types::AgentStatus;
    use chrono::Utc;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> Registry {
        let paths = SessionPaths::new(SessionId::new("reg").unwrap(), temp.path(), temp.path());
        Registry::new(&paths)
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let temp = TempDir::new().unwrap();
        let data = registry(&temp).load().unwrap();
        assert_eq!(data, RegistryData::default());
    }

    #[test]
    fn test_ids_are_allocated_across_instances() {
        let temp = TempDir::new().unwrap();
        let first = registry(&temp).update(|d| d.allocate_id()).unwrap();
        let second = registry(&temp).update(|d| d.allocate_id()).unwrap();
        assert_eq!(first, "agent-1");
        assert_eq!(second, "agent-2");
    }

    #[test]
    fn test_records_persist() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        reg.update(|d| {
            let agent_id = d.allocate_id();
            d.agents.push(AgentRecord {
                agent_id,
                pid: 4242,
                task: "write docs".to_string(),
                model: "sonnet".to_string(),
                mode: AgentMode::Oneshot,
                status: AgentStatus::Running,
                started_at: Utc::now(),
                log_path: temp.path().join("agent-1.log"),
                ended_at: None,
                exit_code: None,
            });
        })
        .unwrap();

        let data = reg.load().unwrap();
        assert_eq!(data.agents.len(), 1);
        assert_eq!(data.agents[0].pid, 4242);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        std::fs::create_dir_all(reg.path().parent().unwrap()).unwrap();
        std::fs::write(reg.path(), b"{ nope").unwrap();
        assert!(matches!(reg.load(), Err(RegistryError::Corrupt { .. })));
    }
}
