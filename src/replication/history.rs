//! # Replication History
//!
//! Per-database log of completed replications, kept in memory for the
//! process lifetime. Each key holds at most [`HISTORY_LIMIT`] entries;
//! the oldest is evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{ReplicationError, ReplicationResult};

/// Maximum entries kept per database
pub const HISTORY_LIMIT: usize = 50;

/// One completed replication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_last_seq: Value,
    pub end_last_seq: Value,
    pub recorded_seq: Value,
    pub missing_checked: usize,
    pub missing_found: usize,
    pub docs_read: usize,
    pub docs_written: usize,
    pub doc_write_failures: usize,
    pub status: String,
}

/// Bounded, per-key replication history
#[derive(Debug)]
pub struct HistoryLog {
    limit: usize,
    entries: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Append an entry, evicting the oldest ones beyond the limit
    pub fn record(&self, key: &str, entry: HistoryEntry) -> ReplicationResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ReplicationError::Internal("Lock poisoned".into()))?;
        let log = entries.entry(key.to_string()).or_default();
        log.push_back(entry);
        while log.len() > self.limit {
            log.pop_front();
        }
        Ok(())
    }

    /// Entries for `key`, oldest first
    pub fn history(&self, key: &str) -> ReplicationResult<Vec<HistoryEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ReplicationError::Internal("Lock poisoned".into()))?;
        Ok(entries
            .get(key)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn len(&self, key: &str) -> usize {
        self.entries
            .read()
            .map(|entries| entries.get(key).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(n: usize) -> HistoryEntry {
        let now = Utc::now();
        HistoryEntry {
            session_id: format!("s{}", n),
            start_time: now,
            end_time: now,
            start_last_seq: json!(0),
            end_last_seq: json!(n),
            recorded_seq: json!(n),
            missing_checked: 0,
            missing_found: 0,
            docs_read: n,
            docs_written: n,
            doc_write_failures: 0,
            status: "completed".into(),
        }
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let log = HistoryLog::new();
        for n in 0..=HISTORY_LIMIT {
            log.record("db", entry(n)).unwrap();
            assert!(log.len("db") <= HISTORY_LIMIT);
        }
        let history = log.history("db").unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].session_id, "s1");
        assert_eq!(history[HISTORY_LIMIT - 1].session_id, format!("s{}", HISTORY_LIMIT));
    }

    #[test]
    fn test_keys_are_independent() {
        let log = HistoryLog::with_limit(2);
        log.record("a", entry(1)).unwrap();
        log.record("b", entry(2)).unwrap();
        assert_eq!(log.len("a"), 1);
        assert_eq!(log.len("b"), 1);
        assert!(log.is_empty("c"));
        assert!(log.history("c").unwrap().is_empty());
    }
}
