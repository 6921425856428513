//! Running log feed.
//!
//! Human-readable lines tagged with the run they belong to. Every line is
//! mirrored to `tracing` at the matching level, so the feed and the process
//! log never disagree.
//!
//! Streamed output grows a single entry per action through
//! [`LogFeed::append`] rather than adding one entry per chunk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub content: String,
    pub run_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct LogFeed {
    entries: RwLock<Vec<LogEntry>>,
}

impl LogFeed {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the Vec intact, so keep going.
    fn read(&self) -> RwLockReadGuard<'_, Vec<LogEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LogEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a line and return its id.
    pub fn add(&self, level: LogLevel, content: impl Into<String>, run_id: Option<&str>) -> String {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            content: content.into(),
            run_id: run_id.map(str::to_string),
        };
        mirror(&entry);
        let id = entry.id.clone();
        self.write().push(entry);
        id
    }

    pub fn info(&self, content: impl Into<String>, run_id: Option<&str>) -> String {
        self.add(LogLevel::Info, content, run_id)
    }

    pub fn warn(&self, content: impl Into<String>, run_id: Option<&str>) -> String {
        self.add(LogLevel::Warn, content, run_id)
    }

    pub fn error(&self, content: impl Into<String>, run_id: Option<&str>) -> String {
        self.add(LogLevel::Error, content, run_id)
    }

    /// Append `text` to an existing entry. Returns false for unknown ids.
    pub fn append(&self, id: &str, text: &str) -> bool {
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Replace an entry's content. Returns false for unknown ids.
    pub fn update(&self, id: &str, content: impl Into<String>) -> bool {
        let mut entries = self.write();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.content = content.into();
                mirror(entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.read().clone()
    }

    pub fn entry(&self, id: &str) -> Option<LogEntry> {
        self.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn entries_for_run(&self, run_id: &str) -> Vec<LogEntry> {
        self.read()
            .iter()
            .filter(|e| e.run_id.as_deref() == Some(run_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn mirror(entry: &LogEntry) {
    let run_id = entry.run_id.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Info => info!(run_id, "{}", entry.content),
        LogLevel::Warn => warn!(run_id, "{}", entry.content),
        LogLevel::Error => error!(run_id, "{}", entry.content),
        LogLevel::Debug => debug!(run_id, "{}", entry.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_filter_by_run() {
        let feed = LogFeed::new();
        feed.info("Executing step 1", Some("r1"));
        feed.warn("unrelated", None);
        feed.error("Step 1 failed", Some("r1"));

        assert_eq!(feed.len(), 3);
        let lines: Vec<_> = feed
            .entries_for_run("r1")
            .into_iter()
            .map(|e| (e.level, e.content))
            .collect();
        assert_eq!(
            lines,
            vec![
                (LogLevel::Info, "Executing step 1".to_string()),
                (LogLevel::Error, "Step 1 failed".to_string()),
            ]
        );
    }

    #[test]
    fn test_append_grows_one_entry() {
        let feed = LogFeed::new();
        let id = feed.info("Step 1 action 1: ", Some("r1"));
        for chunk in ["Hel", "lo"] {
            assert!(feed.append(&id, chunk));
        }
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.entry(&id).unwrap().content, "Step 1 action 1: Hello");
        assert!(!feed.append("missing", "x"));
    }

    #[test]
    fn test_update_remove_clear() {
        let feed = LogFeed::new();
        let id = feed.add(LogLevel::Debug, "draft", None);
        assert!(feed.update(&id, "final"));
        assert_eq!(feed.entries()[0].content, "final");
        assert!(feed.remove(&id));
        assert!(!feed.remove(&id));

        feed.info("a", None);
        feed.clear();
        assert!(feed.is_empty());
    }
}
