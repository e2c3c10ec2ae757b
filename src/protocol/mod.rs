//! Wire protocol between clients and the session broker.
//!
//! Every exchange is one request line answered by one response line, both
//! JSON objects. Requests are tagged by `op`, responses by `type`:
//!
//! ```text
//! -> {"op":"acquire_file_lock","agent_id":"agent-1","path":"src/x.txt","mode":"write"}
//! <- {"type":"ok","granted":false,"holder":"agent-2"}
//! ```

pub mod codec;
pub mod types;

pub use codec::{read_frame, write_frame, ProtocolError, MAX_FRAME_BYTES, MAX_PAYLOAD_BYTES};
pub use types::{
    BrokerInfo, Discovery, FileLockEntry, GitLockEntry, LockMode, Message, MessageKind,
    RegisteredAgent, Severity, StatusSnapshot, Warning,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Register {
        agent_id: String,
        #[serde(default)]
        task: String,
    },
    AcquireFileLock {
        agent_id: String,
        path: String,
        #[serde(default)]
        mode: LockMode,
    },
    ReleaseFileLock {
        agent_id: String,
        path: String,
    },
    AcquireGitLock {
        agent_id: String,
    },
    ReleaseGitLock {
        agent_id: String,
    },
    /// `agent_id` is the sender
    SendMessage {
        agent_id: String,
        to: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        content: String,
    },
    PollInbox {
        agent_id: String,
    },
    GetStatus {
        agent_id: String,
    },
    RecordDiscovery {
        agent_id: String,
        category: String,
        content: String,
    },
    /// Entries are returned from index `from` on, as many as fit in one frame
    GetDiscoveries {
        agent_id: String,
        #[serde(default)]
        from: usize,
    },
    RecordWarning {
        agent_id: String,
        severity: Severity,
        content: String,
    },
    GetWarnings {
        agent_id: String,
        #[serde(default)]
        from: usize,
    },
    Shutdown {
        agent_id: String,
    },
}

impl Request {
    /// Operation name as it appears on the wire
    pub fn op(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::AcquireFileLock { .. } => "acquire_file_lock",
            Request::ReleaseFileLock { .. } => "release_file_lock",
            Request::AcquireGitLock { .. } => "acquire_git_lock",
            Request::ReleaseGitLock { .. } => "release_git_lock",
            Request::SendMessage { .. } => "send_message",
            Request::PollInbox { .. } => "poll_inbox",
            Request::GetStatus { .. } => "get_status",
            Request::RecordDiscovery { .. } => "record_discovery",
            Request::GetDiscoveries { .. } => "get_discoveries",
            Request::RecordWarning { .. } => "record_warning",
            Request::GetWarnings { .. } => "get_warnings",
            Request::Shutdown { .. } => "shutdown",
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            Request::Register { agent_id, .. }
            | Request::AcquireFileLock { agent_id, .. }
            | Request::ReleaseFileLock { agent_id, .. }
            | Request::AcquireGitLock { agent_id }
            | Request::ReleaseGitLock { agent_id }
            | Request::SendMessage { agent_id, .. }
            | Request::PollInbox { agent_id }
            | Request::GetStatus { agent_id }
            | Request::RecordDiscovery { agent_id, .. }
            | Request::GetDiscoveries { agent_id, .. }
            | Request::RecordWarning { agent_id, .. }
            | Request::GetWarnings { agent_id, .. }
            | Request::Shutdown { agent_id } => agent_id,
        }
    }
}

/// Payload of an `ok` response. Fields are present only when meaningful for the op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_to: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Structured failure: which operation, on what, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerFailure {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub reason: String,
}

impl std::fmt::Display for BrokerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} on '{}' failed: {}", self.op, target, self.reason),
            None => write!(f, "{} failed: {}", self.op, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok(Ack),
    Error(BrokerFailure),
    Status(StatusSnapshot),
    /// `remaining` counts messages left queued because the frame was full
    Messages {
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "is_zero")]
        remaining: usize,
    },
    /// `next` is the index to ask for when the log did not fit in one frame
    Discoveries {
        discoveries: Vec<Discovery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<usize>,
    },
    Warnings {
        warnings: Vec<Warning>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<usize>,
    },
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Encoded size of one item inside a response array
pub fn encoded_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

/// The longest run of `items` starting at `from` whose encoding fits in one
/// response, and the index to continue from when some were left out. The first
/// item is always included so a caller can never be stuck.
pub fn page<T: Serialize + Clone>(items: &[T], from: usize) -> (Vec<T>, Option<usize>) {
    let mut used = 0;
    let mut taken = Vec::new();
    for item in items.iter().skip(from) {
        let size = encoded_len(item).saturating_add(1);
        if !taken.is_empty() && used + size > MAX_PAYLOAD_BYTES {
            let next = from + taken.len();
            return (taken, Some(next));
        }
        used += size;
        taken.push(item.clone());
    }
    (taken, None)
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(Ack::default())
    }

    pub fn error(op: &str, target: Option<&str>, reason: impl Into<String>) -> Self {
        Response::Error(BrokerFailure {
            op: op.to_string(),
            target: target.map(str::to_string),
            reason: reason.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ok(_) => "ok",
            Response::Error(_) => "error",
            Response::Status(_) => "status",
            Response::Messages { .. } => "messages",
            Response::Discoveries { .. } => "discoveries",
            Response::Warnings { .. } => "warnings",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::AcquireFileLock {
            agent_id: "agent-1".to_string(),
            path: "src/x.txt".to_string(),
            mode: LockMode::Write,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"op": "acquire_file_lock", "agent_id": "agent-1", "path": "src/x.txt", "mode": "write"})
        );
    }

    #[test]
    fn test_send_message_uses_type_field() {
        let parsed: Request = serde_json::from_value(json!({
            "op": "send_message",
            "agent_id": "agent-1",
            "to": "user",
            "type": "question",
            "content": "ok to proceed?"
        }))
        .unwrap();

        assert_eq!(parsed.op(), "send_message");
        assert_eq!(parsed.agent_id(), "agent-1");
        match parsed {
            Request::SendMessage { kind, .. } => assert_eq!(kind, MessageKind::Question),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_lock_mode_defaults_to_write() {
        let parsed: Request = serde_json::from_value(json!({
            "op": "acquire_file_lock",
            "agent_id": "a",
            "path": "p"
        }))
        .unwrap();
        assert!(matches!(
            parsed,
            Request::AcquireFileLock { mode: LockMode::Write, .. }
        ));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let parsed = serde_json::from_value::<Request>(json!({"op": "steal_lock", "agent_id": "a"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_response_wire_shapes() {
        let denied = Response::Ok(Ack {
            granted: Some(false),
            holder: Some("agent-2".to_string()),
            ..Ack::default()
        });
        assert_eq!(
            serde_json::to_value(&denied).unwrap(),
            json!({"type": "ok", "granted": false, "holder": "agent-2"})
        );

        assert_eq!(serde_json::to_value(Response::ok()).unwrap(), json!({"type": "ok"}));

        let failure = Response::error("send_message", Some("agent-9"), "unknown recipient");
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"type": "error", "op": "send_message", "target": "agent-9", "reason": "unknown recipient"})
        );

        let empty = Response::Messages {
            messages: vec![],
            remaining: 0,
        };
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            json!({"type": "messages", "messages": []})
        );
    }

    #[test]
    fn test_get_discoveries_defaults_to_the_start() {
        let parsed: Request =
            serde_json::from_value(json!({"op": "get_discoveries", "agent_id": "user"})).unwrap();
        assert_eq!(
            parsed,
            Request::GetDiscoveries {
                agent_id: "user".to_string(),
                from: 0
            }
        );
    }

    #[test]
    fn test_page_splits_by_encoded_size() {
        let big = "x".repeat(MAX_PAYLOAD_BYTES / 2);
        let items = vec![big.clone(), big.clone(), "small".to_string()];

        let (first, next) = page(&items, 0);
        assert_eq!(first.len(), 1);
        assert_eq!(next, Some(1));

        let (second, next) = page(&items, 1);
        assert_eq!(second, vec![big, "small".to_string()]);
        assert_eq!(next, None);

        let (past_end, next) = page(&items, 7);
        assert!(past_end.is_empty());
        assert_eq!(next, None);
    }
}
