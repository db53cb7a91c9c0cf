//! JSONL Audit Persistence
//!
//! Appends one JSON object per line for every audit entry and reloads the
//! trail on startup. Malformed lines are reported with their line number,
//! never skipped: a hole in the trail must surface as an error.

use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::audit::AuditTrailEntry;
use crate::ports::audit_sink::{AuditSink, AuditSinkError};

#[derive(Debug, Error)]
pub enum AuditFileError {
    #[error("Failed to read audit file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed audit entry on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Appends audit entries to a JSONL file
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    // Serializes writers so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditSinkError> {
        let path = path.into();
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| AuditSinkError::Io(e.to_string()))?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn persist(&self, entry: &AuditTrailEntry) -> Result<(), AuditSinkError> {
        let json = serde_json::to_string(entry)
            .map_err(|e| AuditSinkError::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &json))
            .await
            .map_err(|e| AuditSinkError::Io(format!("Task join error: {}", e)))?
            .map_err(|e| AuditSinkError::Io(e.to_string()))
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.sync_data()
}

/// Read a persisted trail; a missing file is an empty trail
pub fn load_trail(path: &Path) -> Result<Vec<AuditTrailEntry>, AuditFileError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|e| AuditFileError::Malformed {
            line: index + 1,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{verify_chain, AuditDecision, AuditTrail, EventSource, SecurityEvent};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("trail.jsonl");
        let sink = Arc::new(JsonlAuditSink::new(&path).unwrap());
        let trail = AuditTrail::new().with_sink(sink);

        for i in 0..5 {
            let event = SecurityEvent::new(EventSource::RuleEngine, AuditDecision::Approved, format!("trade {}", i))
                .with_agent("agent-1")
                .with_metadata(serde_json::json!({ "amount_sol": 0.25 * i as f64 }));
            trail.log_security_event(event).await.unwrap();
        }

        let loaded = load_trail(&path).unwrap();
        assert_eq!(loaded, trail.entries().await);
        assert!(verify_chain(&loaded).valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_persists_keep_lines_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trail.jsonl");
        let sink = Arc::new(JsonlAuditSink::new(&path).unwrap());
        let source = AuditTrail::new();
        for i in 0..16 {
            let event = SecurityEvent::new(EventSource::RuleEngine, AuditDecision::Approved, "x".repeat(i * 512));
            source.log_security_event(event).await.unwrap();
        }

        let mut handles = Vec::new();
        for entry in source.entries().await {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move { sink.persist(&entry).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(load_trail(&path).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_io_error() {
        let dir = TempDir::new().unwrap();
        // the sink path is an existing directory
        let sink = JsonlAuditSink::new(dir.path()).unwrap();
        let entry = AuditTrail::new()
            .log_security_event(SecurityEvent::new(EventSource::Operator, AuditDecision::Approved, "reset"))
            .await
            .unwrap();
        assert!(matches!(sink.persist(&entry).await, Err(AuditSinkError::Io(_))));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_trail(&dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trail.jsonl");
        fs::write(&path, "\n{\"id\": \"truncated\"\n").unwrap();

        match load_trail(&path) {
            Err(AuditFileError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edited_file_fails_verification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trail.jsonl");
        let trail = AuditTrail::new().with_sink(Arc::new(JsonlAuditSink::new(&path).unwrap()));
        for _ in 0..3 {
            trail
                .log_security_event(SecurityEvent::new(EventSource::Preflight, AuditDecision::Rejected, "blocked"))
                .await
                .unwrap();
        }

        let content = fs::read_to_string(&path).unwrap().replacen("blocked", "approved", 1);
        fs::write(&path, content).unwrap();

        let report = verify_chain(&load_trail(&path).unwrap());
        assert!(!report.valid);
        assert_eq!(report.invalid_entries.len(), 1);
    }
}
