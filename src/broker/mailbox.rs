use crate::identity::{BROADCAST_TARGET, USER_AGENT_ID};
use crate::protocol::{encoded_len, Message, MessageKind, RegisteredAgent, MAX_PAYLOAD_BYTES};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    #[error("unknown recipient")]
    UnknownRecipient,
    #[error("'{0}' is reserved")]
    ReservedId(String),
    #[error("agent id must not be empty")]
    EmptyId,
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },
}

#[derive(Debug)]
struct Mailbox {
    task: String,
    registered_at: DateTime<Utc>,
    queue: VecDeque<Message>,
}

impl Mailbox {
    fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            registered_at: Utc::now(),
            queue: VecDeque::new(),
        }
    }
}

/// Outcome of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: u64,
    pub delivered_to: usize,
}

/// Per-agent FIFO queues. Message ids are broker-wide and strictly increasing.
#[derive(Debug)]
pub struct MailboxStore {
    next_id: u64,
    mailboxes: BTreeMap<String, Mailbox>,
}

impl Default for MailboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxStore {
    /// Store with the primary session's mailbox already present
    pub fn new() -> Self {
        let mut mailboxes = BTreeMap::new();
        mailboxes.insert(USER_AGENT_ID.to_string(), Mailbox::new("primary session"));
        Self {
            next_id: 1,
            mailboxes,
        }
    }

    /// Create a mailbox for `agent_id`. Re-registering keeps the pending queue
    /// and only fills in a task that was previously empty.
    pub fn register(&mut self, agent_id: &str, task: &str) -> Result<bool, MailboxError> {
        if agent_id.trim().is_empty() {
            return Err(MailboxError::EmptyId);
        }
        if agent_id == BROADCAST_TARGET {
            return Err(MailboxError::ReservedId(agent_id.to_string()));
        }

        match self.mailboxes.get_mut(agent_id) {
            Some(existing) => {
                if existing.task.is_empty() && !task.is_empty() {
                    existing.task = task.to_string();
                }
                Ok(false)
            }
            None => {
                self.mailboxes
                    .insert(agent_id.to_string(), Mailbox::new(task));
                Ok(true)
            }
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }

    /// Queue a message. `to = "all"` copies it into every mailbox except the sender's.
    /// An unknown recipient consumes no id.
    pub fn send(
        &mut self,
        from: &str,
        to: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<Delivery, MailboxError> {
        let recipients: Vec<String> = if to == BROADCAST_TARGET {
            self.mailboxes
                .keys()
                .filter(|id| id.as_str() != from)
                .cloned()
                .collect()
        } else if self.mailboxes.contains_key(to) {
            vec![to.to_string()]
        } else {
            return Err(MailboxError::UnknownRecipient);
        };

        let message = Message {
            id: self.next_id,
            from: from.to_string(),
            to: to.to_string(),
            kind,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        // Must fit in a poll response on its own
        let size = encoded_len(&message);
        if size > MAX_PAYLOAD_BYTES {
            return Err(MailboxError::TooLarge {
                size,
                limit: MAX_PAYLOAD_BYTES,
            });
        }
        self.next_id += 1;

        for recipient in &recipients {
            if let Some(mailbox) = self.mailboxes.get_mut(recipient) {
                mailbox.queue.push_back(message.clone());
            }
        }

        Ok(Delivery {
            message_id: message.id,
            delivered_to: recipients.len(),
        })
    }

    /// Dequeue pending messages for `agent_id`, oldest first, as many as fit
    /// in one response. The rest stay queued for the next poll.
    pub fn poll(&mut self, agent_id: &str) -> Vec<Message> {
        let Some(mailbox) = self.mailboxes.get_mut(agent_id) else {
            return Vec::new();
        };

        let mut used = 0;
        let mut batch = Vec::new();
        while let Some(next) = mailbox.queue.front() {
            let size = encoded_len(next).saturating_add(1);
            if !batch.is_empty() && used + size > MAX_PAYLOAD_BYTES {
                break;
            }
            used += size;
            if let Some(message) = mailbox.queue.pop_front() {
                batch.push(message);
            }
        }
        batch
    }

    pub fn pending(&self, agent_id: &str) -> usize {
        self.mailboxes
            .get(agent_id)
            .map(|mailbox| mailbox.queue.len())
            .unwrap_or(0)
    }

    pub fn agents(&self) -> Vec<RegisteredAgent> {
        self.mailboxes
            .iter()
            .map(|(agent_id, mailbox)| RegisteredAgent {
                agent_id: agent_id.clone(),
                task: mailbox.task.clone(),
                registered_at: mailbox.registered_at,
                pending_messages: mailbox.queue.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(agents: &[&str]) -> MailboxStore {
        let mut store = MailboxStore::new();
        for agent in agents {
            store.register(agent, "").unwrap();
        }
        store
    }

    #[test]
    fn test_user_mailbox_exists_from_start() {
        let store = MailboxStore::new();
        assert!(store.is_registered(USER_AGENT_ID));
    }

    #[test]
    fn test_fifo_per_mailbox_and_poll_drains() {
        let mut store = store_with(&["A", "B"]);
        store.send("A", "B", MessageKind::Status, "m1").unwrap();
        store.send("A", "B", MessageKind::Status, "m2").unwrap();
        store.send("A", "B", MessageKind::Status, "m3").unwrap();

        let contents: Vec<String> = store.poll("B").into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
        assert!(store.poll("B").is_empty());
    }

    #[test]
    fn test_message_ids_are_strictly_increasing() {
        let mut store = store_with(&["A"]);
        let first = store.send("A", "user", MessageKind::Question, "q1").unwrap();
        let second = store.send("user", "A", MessageKind::Guidance, "g1").unwrap();
        assert_eq!(first.message_id, 1);
        assert!(second.message_id > first.message_id);
    }

    #[test]
    fn test_broadcast_skips_sender_and_late_joiners() {
        let mut store = store_with(&["A", "B", "C"]);
        let delivery = store.send("A", "all", MessageKind::Broadcast, "hi").unwrap();
        // B, C and user
        assert_eq!(delivery.delivered_to, 3);

        store.register("D", "").unwrap();
        assert!(store.poll("A").is_empty());
        assert!(store.poll("D").is_empty());
        assert_eq!(store.poll("B").len(), 1);
        assert_eq!(store.poll("C")[0].to, "all");
    }

    #[test]
    fn test_unknown_recipient_consumes_no_id() {
        let mut store = store_with(&["A"]);
        assert_eq!(
            store.send("A", "agent-9", MessageKind::Question, "?"),
            Err(MailboxError::UnknownRecipient)
        );
        let next = store.send("A", "user", MessageKind::Question, "?").unwrap();
        assert_eq!(next.message_id, 1);
    }

    #[test]
    fn test_register_is_idempotent_and_keeps_queue() {
        let mut store = store_with(&["A"]);
        store.send("user", "A", MessageKind::Guidance, "go").unwrap();
        assert!(!store.register("A", "later task").unwrap());
        assert_eq!(store.poll("A").len(), 1);

        let agent = store
            .agents()
            .into_iter()
            .find(|a| a.agent_id == "A")
            .unwrap();
        assert_eq!(agent.task, "later task");
    }

    #[test]
    fn test_reserved_and_empty_ids_are_rejected() {
        let mut store = MailboxStore::new();
        assert!(matches!(
            store.register("all", ""),
            Err(MailboxError::ReservedId(_))
        ));
        assert_eq!(store.register("  ", ""), Err(MailboxError::EmptyId));
    }

    #[test]
    fn test_poll_stops_at_frame_budget_and_keeps_the_rest() {
        let mut store = store_with(&["A", "B"]);
        let big = "x".repeat(700 * 1024);
        store.send("A", "B", MessageKind::Status, &big).unwrap();
        store.send("A", "B", MessageKind::Status, &big).unwrap();
        store.send("A", "B", MessageKind::Status, "tail").unwrap();

        let first = store.poll("B");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 1);
        assert_eq!(store.pending("B"), 2);

        let second = store.poll("B");
        let ids: Vec<u64> = second.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(store.pending("B"), 0);
    }

    #[test]
    fn test_oversized_message_is_refused_without_an_id() {
        let mut store = store_with(&["A"]);
        let huge = "x".repeat(MAX_PAYLOAD_BYTES);
        assert!(matches!(
            store.send("A", "user", MessageKind::Status, &huge),
            Err(MailboxError::TooLarge { .. })
        ));
        assert_eq!(store.pending("user"), 0);
        assert_eq!(store.send("A", "user", MessageKind::Status, "ok").unwrap().message_id, 1);
    }

    #[test]
    fn test_poll_unknown_agent_is_empty() {
        let mut store = MailboxStore::new();
        assert!(store.poll("ghost").is_empty());
    }
}
