// Broker-wide append-only logs of discoveries and warnings

use crate::protocol::{encoded_len, Discovery, Severity, Warning, MAX_PAYLOAD_BYTES};
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry of {size} bytes exceeds the {limit}-byte limit")]
pub struct EntryTooLarge {
    pub size: usize,
    pub limit: usize,
}

/// Every entry must fit in a read response on its own
fn check_size<T: serde::Serialize>(entry: &T) -> Result<(), EntryTooLarge> {
    let size = encoded_len(entry);
    if size > MAX_PAYLOAD_BYTES {
        return Err(EntryTooLarge {
            size,
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct Journal {
    discoveries: Vec<Discovery>,
    warnings: Vec<Warning>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_discovery(
        &mut self,
        agent_id: &str,
        category: &str,
        content: &str,
    ) -> Result<(), EntryTooLarge> {
        let entry = Discovery {
            agent_id: agent_id.to_string(),
            category: category.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        check_size(&entry)?;
        self.discoveries.push(entry);
        Ok(())
    }

    pub fn record_warning(
        &mut self,
        agent_id: &str,
        severity: Severity,
        content: &str,
    ) -> Result<(), EntryTooLarge> {
        let entry = Warning {
            agent_id: agent_id.to_string(),
            severity,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        check_size(&entry)?;
        self.warnings.push(entry);
        Ok(())
    }

    pub fn discoveries(&self) -> &[Discovery] {
        &self.discoveries
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_keep_insertion_order() {
        let mut journal = Journal::new();
        journal.record_discovery("agent-1", "api", "endpoint is paginated").unwrap();
        journal.record_discovery("agent-2", "build", "needs protoc").unwrap();
        journal.record_warning("agent-1", Severity::High, "flaky test").unwrap();

        let categories: Vec<&str> = journal
            .discoveries()
            .iter()
            .map(|d| d.category.as_str())
            .collect();
        assert_eq!(categories, vec!["api", "build"]);
        assert_eq!(journal.warnings()[0].severity, Severity::High);
    }

    #[test]
    fn test_oversized_entry_is_refused() {
        let mut journal = Journal::new();
        let huge = "x".repeat(MAX_PAYLOAD_BYTES);
        assert!(journal.record_discovery("agent-1", "dump", &huge).is_err());
        assert!(journal.record_warning("agent-1", Severity::Low, &huge).is_err());
        assert!(journal.discoveries().is_empty());
        assert!(journal.warnings().is_empty());
    }
}
