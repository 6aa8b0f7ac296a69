//! Audit sink implementations (§5, §7): "write-only... fire-and-forget...
//! unavailability is logged but never fails the request." Neither
//! implementation here ever returns an error to the caller — failures are
//! logged and swallowed, matching the teacher's tolerant-logging posture
//! in `voice-agent/backend/crates/server/src/main.rs::init_tracing`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ragquery_core::{AuditEntry, AuditSink};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Keeps every entry in memory. Intended for tests and small deployments;
/// unbounded, so a long-lived process should prefer `JsonlFileAuditSink`.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

/// Appends one JSON object per line to a file, opening/closing it on every
/// write so concurrent processes can tail it safely. A write failure is
/// logged at `warn` and otherwise ignored.
pub struct JsonlFileAuditSink {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonlFileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlFileAuditSink {
    async fn append(&self, entry: AuditEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize audit entry");
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;

        let mut file = match file {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "audit sink unavailable");
                return;
            }
        };

        if let Err(err) = file.write_all(format!("{line}\n").as_bytes()).await {
            warn!(error = %err, path = %self.path.display(), "failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry() -> AuditEntry {
        AuditEntry {
            request_id: "req-1".to_string(),
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            timestamp: chrono::Utc::now(),
            stage_durations_ms: HashMap::new(),
            guardrail_is_answerable: Some(true),
            guardrail_confidence: Some(0.8),
            result_count: 3,
            citation_count: 2,
            error_code: None,
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_sink_records_every_append() {
        let sink = InMemoryAuditSink::new();
        sink.append(entry()).await;
        sink.append(entry()).await;
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_sink_writes_one_line_per_entry() {
        let dir = std::env::temp_dir().join(format!("ragquery-audit-test-{}", std::process::id()));
        let sink = JsonlFileAuditSink::new(&dir);
        sink.append(entry()).await;
        sink.append(entry()).await;

        let contents = tokio::fs::read_to_string(&dir).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = tokio::fs::remove_file(&dir).await;
    }

    #[tokio::test]
    async fn unwritable_path_does_not_panic() {
        let sink = JsonlFileAuditSink::new("/nonexistent-directory/audit.jsonl");
        sink.append(entry()).await;
    }
}
