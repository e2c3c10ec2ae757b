//! Lock Table: the single source of truth for who may write.

use crate::protocol::{FileLockEntry, GitLockEntry, LockMode};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Component, Path};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Holder {
    owner: String,
    mode: LockMode,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    /// The requester already held the resource
    AlreadyHeld,
    Denied { holder: String },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, AcquireOutcome::Denied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotLocked,
    HeldByOther { holder: String },
}

#[derive(Debug, Default)]
pub struct LockTable {
    files: BTreeMap<String, Holder>,
    git: Option<Holder>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_file(&mut self, path: &str, agent_id: &str, mode: LockMode) -> AcquireOutcome {
        let key = normalize_path(path);
        match self.files.get_mut(&key) {
            Some(holder) if holder.owner != agent_id => AcquireOutcome::Denied {
                holder: holder.owner.clone(),
            },
            Some(holder) if holder.mode == mode => AcquireOutcome::AlreadyHeld,
            Some(holder) => {
                // Sole holder switching mode keeps the record, with the new mode
                holder.mode = mode;
                AcquireOutcome::Granted
            }
            None => {
                self.files.insert(
                    key,
                    Holder {
                        owner: agent_id.to_string(),
                        mode,
                        acquired_at: Utc::now(),
                    },
                );
                AcquireOutcome::Granted
            }
        }
    }

    pub fn release_file(&mut self, path: &str, agent_id: &str) -> ReleaseOutcome {
        let key = normalize_path(path);
        match self.files.get(&key) {
            None => ReleaseOutcome::NotLocked,
            Some(holder) if holder.owner != agent_id => ReleaseOutcome::HeldByOther {
                holder: holder.owner.clone(),
            },
            Some(_) => {
                self.files.remove(&key);
                ReleaseOutcome::Released
            }
        }
    }

    pub fn acquire_git(&mut self, agent_id: &str) -> AcquireOutcome {
        match &self.git {
            Some(holder) if holder.owner == agent_id => AcquireOutcome::AlreadyHeld,
            Some(holder) => AcquireOutcome::Denied {
                holder: holder.owner.clone(),
            },
            None => {
                self.git = Some(Holder {
                    owner: agent_id.to_string(),
                    mode: LockMode::Write,
                    acquired_at: Utc::now(),
                });
                AcquireOutcome::Granted
            }
        }
    }

    pub fn release_git(&mut self, agent_id: &str) -> ReleaseOutcome {
        match &self.git {
            None => ReleaseOutcome::NotLocked,
            Some(holder) if holder.owner != agent_id => ReleaseOutcome::HeldByOther {
                holder: holder.owner.clone(),
            },
            Some(_) => {
                self.git = None;
                ReleaseOutcome::Released
            }
        }
    }

    pub fn file_holder(&self, path: &str) -> Option<&str> {
        self.files
            .get(&normalize_path(path))
            .map(|holder| holder.owner.as_str())
    }

    pub fn git_holder(&self) -> Option<&str> {
        self.git.as_ref().map(|holder| holder.owner.as_str())
    }

    pub fn file_entries(&self) -> Vec<FileLockEntry> {
        self.files
            .iter()
            .map(|(path, holder)| FileLockEntry {
                path: path.clone(),
                owner: holder.owner.clone(),
                mode: holder.mode,
                acquired_at: holder.acquired_at,
            })
            .collect()
    }

    pub fn git_entry(&self) -> Option<GitLockEntry> {
        self.git.as_ref().map(|holder| GitLockEntry {
            owner: holder.owner.clone(),
            acquired_at: holder.acquired_at,
        })
    }
}

/// Lexical normalization so `./src//a.rs` and `src/b/../a.rs` share one key.
/// Does not touch the filesystem; paths that do not exist yet are lockable.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;

    for component in Path::new(path.trim()).components() {
        match component {
            Component::RootDir => absolute = true,
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push("..".to_string()),
            },
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
