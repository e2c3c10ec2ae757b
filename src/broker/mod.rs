//! Session broker: the single owner of locks, mailboxes and the shared logs.
//!
//! One broker process runs per session and answers requests over a Unix
//! socket. It keeps everything in memory; when it dies the state is gone and
//! clients must treat that as "unknown", not as "nothing held".

pub mod daemon;
pub mod journal;
pub mod locks;
pub mod mailbox;
pub mod server;
pub mod state;

pub use daemon::{broker_is_listening, detach, ensure_broker};
pub use locks::{normalize_path, AcquireOutcome, LockTable, ReleaseOutcome};
pub use mailbox::{MailboxError, MailboxStore};
pub use server::serve;
pub use state::BrokerState;
