//! Append-only audit trail.
//!
//! Every state-changing operation appends one NDJSON entry: UTF-8, one
//! JSON object per line, LF-terminated, never mutated. Appends take an
//! exclusive lock; a failed write is reported and never blocks the
//! operation that produced it. Queries are read-only scans with
//! offset/limit and an optional text filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Event timestamp.
    pub ts: DateTime<Utc>,
    /// Who acted; the local operator unless stated otherwise.
    pub actor: String,
    /// Card or subsystem the operation touched, e.g. `install:ruff`.
    pub card: String,
    /// Verb, e.g. `plan`, `execute`, `step_failed`, `cache_bust`.
    pub action: String,
    /// Object of the action, e.g. a tool id or card key.
    pub target: String,
    /// State before the operation, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<serde_json::Value>,
    /// State after the operation, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<serde_json::Value>,
    /// Precomputed diff for the UI, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<serde_json::Value>,
    /// Groups the entries of one logical operation.
    pub operation_id: String,
}

impl AuditEntry {
    /// A minimal entry for the local operator.
    #[must_use]
    pub fn new(card: &str, action: &str, target: &str, operation_id: &str) -> Self {
        Self {
            ts: Utc::now(),
            actor: "operator".to_string(),
            card: card.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            before_state: None,
            after_state: None,
            diff: None,
            operation_id: operation_id.to_string(),
        }
    }
}

/// Fresh operation id for grouping related entries.
#[must_use]
pub fn new_operation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    /// Matching entries, newest first.
    pub entries: Vec<AuditEntry>,
    /// Total entries in the log.
    pub total_all: usize,
    /// Entries matching the filter.
    pub total_filtered: usize,
    /// More filtered entries exist past this page.
    pub has_more: bool,
}

/// Query parameters.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Entries to skip.
    pub offset: usize,
    /// Page size; 0 means a default of 50.
    pub limit: usize,
    /// Restrict to one card.
    pub card: Option<String>,
    /// Case-insensitive text filter over action, target and card.
    pub q: Option<String>,
}

/// Append-only writer over the NDJSON log.
#[derive(Debug)]
pub struct AuditWriter {
    path: PathBuf,
    // One writer at a time; entries are single atomic lines.
    append_lock: Mutex<()>,
}

impl AuditWriter {
    /// Create a writer over `path`. The file appears on first append.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            append_lock: Mutex::new(()),
        }
    }

    /// Append one entry. Failures are logged and swallowed: audit trouble
    /// must never fail the operation being audited.
    pub async fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.try_record(entry).await {
            warn!("audit append failed: {e}");
        }
    }

    async fn try_record(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(std::io::Error::other)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Scan the log. Entries are returned newest first; malformed lines
    /// are skipped rather than failing the scan.
    pub async fn query(&self, query: &AuditQuery) -> AuditPage {
        let contents = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();

        let mut all: Vec<AuditEntry> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let total_all = all.len();
        all.reverse();

        let needle = query.q.as_deref().map(str::to_lowercase);
        let filtered: Vec<AuditEntry> = all
            .into_iter()
            .filter(|entry| {
                if let Some(card) = &query.card {
                    if &entry.card != card {
                        return false;
                    }
                }
                if let Some(needle) = &needle {
                    let haystack = format!(
                        "{} {} {}",
                        entry.action.to_lowercase(),
                        entry.target.to_lowercase(),
                        entry.card.to_lowercase()
                    );
                    if !haystack.contains(needle.as_str()) {
                        return false;
                    }
                }
                true
            })
            .collect();

        let total_filtered = filtered.len();
        let limit = if query.limit == 0 { 50 } else { query.limit };
        let entries: Vec<AuditEntry> = filtered
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();
        let has_more = query.offset + entries.len() < total_filtered;

        AuditPage {
            entries,
            total_all,
            total_filtered,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_in(dir: &Path) -> AuditWriter {
        AuditWriter::new(&dir.join("audit.ndjson"))
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());

        let op = new_operation_id();
        writer.record(&AuditEntry::new("install:ruff", "plan", "ruff", &op)).await;
        writer
            .record(&AuditEntry::new("install:ruff", "execute", "ruff", &op))
            .await;

        let page = writer.query(&AuditQuery::default()).await;
        assert_eq!(page.total_all, 2);
        assert_eq!(page.total_filtered, 2);
        assert!(!page.has_more);
        // Newest first.
        assert_eq!(page.entries[0].action, "execute");
        assert_eq!(page.entries[0].operation_id, page.entries[1].operation_id);
    }

    #[tokio::test]
    async fn test_entries_are_single_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());

        let mut entry = AuditEntry::new("cache", "cache_bust", "wiz:detect", "op-1");
        entry.after_state = Some(serde_json::json!({"generation": 4, "note": "multi\nline"}));
        writer.record(&entry).await;

        let raw = std::fs::read_to_string(dir.path().join("audit.ndjson")).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_card_and_text_filters() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());

        writer.record(&AuditEntry::new("install:ruff", "execute", "ruff", "op-1")).await;
        writer.record(&AuditEntry::new("install:jq", "execute", "jq", "op-2")).await;
        writer.record(&AuditEntry::new("cache", "cache_bust", "all", "op-3")).await;

        let page = writer
            .query(&AuditQuery {
                card: Some("install:jq".to_string()),
                ..AuditQuery::default()
            })
            .await;
        assert_eq!(page.total_filtered, 1);
        assert_eq!(page.entries[0].target, "jq");

        let page = writer
            .query(&AuditQuery {
                q: Some("BUST".to_string()),
                ..AuditQuery::default()
            })
            .await;
        assert_eq!(page.total_filtered, 1);
        assert_eq!(page.entries[0].action, "cache_bust");
        assert_eq!(page.total_all, 3);
    }

    #[tokio::test]
    async fn test_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());

        for i in 0..5 {
            writer
                .record(&AuditEntry::new("install:jq", "step", &format!("step-{i}"), "op"))
                .await;
        }

        let page = writer
            .query(&AuditQuery {
                offset: 0,
                limit: 2,
                ..AuditQuery::default()
            })
            .await;
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more);
        // Newest first: step-4, step-3.
        assert_eq!(page.entries[0].target, "step-4");

        let page = writer
            .query(&AuditQuery {
                offset: 4,
                limit: 2,
                ..AuditQuery::default()
            })
            .await;
        assert_eq!(page.entries.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        std::fs::write(&path, "{broken\n").unwrap();

        let writer = AuditWriter::new(&path);
        writer.record(&AuditEntry::new("c", "a", "t", "op")).await;

        let page = writer.query(&AuditQuery::default()).await;
        assert_eq!(page.total_all, 1);
    }

    #[tokio::test]
    async fn test_query_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(dir.path());
        let page = writer.query(&AuditQuery::default()).await;
        assert_eq!(page.total_all, 0);
        assert!(page.entries.is_empty());
    }
}
