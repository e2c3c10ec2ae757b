//! Broker state and the request state machine.
//!
//! `BrokerState::apply` is the only mutation entry point. The server feeds it one
//! request at a time, so every operation completes before the next begins and
//! no request is ever partially applied.

use super::journal::Journal;
use super::locks::{AcquireOutcome, LockTable, ReleaseOutcome};
use super::mailbox::{MailboxError, MailboxStore};
use crate::protocol::{page, Ack, BrokerInfo, Request, Response, StatusSnapshot};
use chrono::Utc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct BrokerState {
    info: BrokerInfo,
    locks: LockTable,
    mailboxes: MailboxStore,
    journal: Journal,
}

impl BrokerState {
    pub fn new(session: &str) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            info: BrokerInfo {
                session: session.to_string(),
                pid: std::process::id(),
                hostname,
                started_at: Utc::now(),
            },
            locks: LockTable::new(),
            mailboxes: MailboxStore::new(),
            journal: Journal::new(),
        }
    }

    pub fn apply(&mut self, request: Request) -> Response {
        let op = request.op();
        if request.agent_id().trim().is_empty() {
            return Response::error(op, None, "agent_id must not be empty");
        }

        match request {
            Request::Register { agent_id, task } => {
                match self.mailboxes.register(&agent_id, &task) {
                    Ok(created) => {
                        if created {
                            info!(agent_id = %agent_id, task = %task, "Agent registered");
                        }
                        Response::ok()
                    }
                    Err(e) => Response::error(op, Some(&agent_id), e.to_string()),
                }
            }

            Request::AcquireFileLock {
                agent_id,
                path,
                mode,
            } => {
                if path.trim().is_empty() {
                    return Response::error(op, None, "path must not be empty");
                }
                let outcome = self.locks.acquire_file(&path, &agent_id, mode);
                debug!(agent_id = %agent_id, path = %path, mode = %mode, ?outcome, "File lock requested");
                acquire_ack(outcome)
            }

            Request::ReleaseFileLock { agent_id, path } => {
                let outcome = self.locks.release_file(&path, &agent_id);
                if !matches!(outcome, ReleaseOutcome::Released) {
                    warn!(agent_id = %agent_id, path = %path, ?outcome, "File lock release was a no-op");
                }
                release_ack(outcome, &path)
            }

            Request::AcquireGitLock { agent_id } => {
                let outcome = self.locks.acquire_git(&agent_id);
                debug!(agent_id = %agent_id, ?outcome, "Git lock requested");
                acquire_ack(outcome)
            }

            Request::ReleaseGitLock { agent_id } => {
                let outcome = self.locks.release_git(&agent_id);
                if !matches!(outcome, ReleaseOutcome::Released) {
                    warn!(agent_id = %agent_id, ?outcome, "Git lock release was a no-op");
                }
                release_ack(outcome, "git")
            }

            Request::SendMessage {
                agent_id,
                to,
                kind,
                content,
            } => match self.mailboxes.send(&agent_id, &to, kind, &content) {
                Ok(delivery) => {
                    info!(
                        from = %agent_id,
                        to = %to,
                        kind = %kind,
                        message_id = delivery.message_id,
                        delivered_to = delivery.delivered_to,
                        "Message queued"
                    );
                    Response::Ok(Ack {
                        message_id: Some(delivery.message_id),
                        delivered_to: Some(delivery.delivered_to),
                        ..Ack::default()
                    })
                }
                Err(MailboxError::UnknownRecipient) => {
                    warn!(from = %agent_id, to = %to, "Message to unknown recipient dropped");
                    Response::error(op, Some(&to), MailboxError::UnknownRecipient.to_string())
                }
                Err(e) => Response::error(op, Some(&to), e.to_string()),
            },

            Request::PollInbox { agent_id } => {
                let messages = self.mailboxes.poll(&agent_id);
                let remaining = self.mailboxes.pending(&agent_id);
                if remaining > 0 {
                    debug!(agent_id = %agent_id, remaining, "Poll filled a frame; rest stays queued");
                }
                Response::Messages {
                    messages,
                    remaining,
                }
            }

            Request::GetStatus { .. } => Response::Status(self.snapshot()),

            Request::RecordDiscovery {
                agent_id,
                category,
                content,
            } => match self.journal.record_discovery(&agent_id, &category, &content) {
                Ok(()) => {
                    info!(agent_id = %agent_id, category = %category, "Discovery recorded");
                    Response::ok()
                }
                Err(e) => Response::error(op, Some(&category), e.to_string()),
            },

            Request::GetDiscoveries { from, .. } => {
                let (discoveries, next) = page(self.journal.discoveries(), from);
                Response::Discoveries { discoveries, next }
            }

            Request::RecordWarning {
                agent_id,
                severity,
                content,
            } => match self.journal.record_warning(&agent_id, severity, &content) {
                Ok(()) => {
                    warn!(agent_id = %agent_id, severity = %severity, "Warning recorded");
                    Response::ok()
                }
                Err(e) => Response::error(op, None, e.to_string()),
            },

            Request::GetWarnings { from, .. } => {
                let (warnings, next) = page(self.journal.warnings(), from);
                Response::Warnings { warnings, next }
            }

            Request::Shutdown { agent_id } => {
                info!(agent_id = %agent_id, "Shutdown requested");
                Response::Ok(Ack {
                    note: Some("broker shutting down".to_string()),
                    ..Ack::default()
                })
            }
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            broker: self.info.clone(),
            file_locks: self.locks.file_entries(),
            git_lock: self.locks.git_entry(),
            agents: self.mailboxes.agents(),
        }
    }
}

fn acquire_ack(outcome: AcquireOutcome) -> Response {
    match outcome {
        AcquireOutcome::Granted => Response::Ok(Ack {
            granted: Some(true),
            ..Ack::default()
        }),
        AcquireOutcome::AlreadyHeld => Response::Ok(Ack {
            granted: Some(true),
            note: Some("already held".to_string()),
            ..Ack::default()
        }),
        AcquireOutcome::Denied { holder } => Response::Ok(Ack {
            granted: Some(false),
            holder: Some(holder),
            ..Ack::default()
        }),
    }
}

fn release_ack(outcome: ReleaseOutcome, resource: &str) -> Response {
    match outcome {
        ReleaseOutcome::Released => Response::Ok(Ack {
            released: Some(true),
            ..Ack::default()
        }),
        ReleaseOutcome::NotLocked => Response::Ok(Ack {
            released: Some(false),
            note: Some(format!("{resource} is not locked")),
            ..Ack::default()
        }),
        ReleaseOutcome::HeldByOther { holder } => Response::Ok(Ack {
            released: Some(false),
            note: Some(format!("{resource} is held by {holder}")),
            holder: Some(holder),
            ..Ack::default()
        }),
    }
}
