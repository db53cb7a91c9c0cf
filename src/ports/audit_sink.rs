use async_trait::async_trait;
use thiserror::Error;

use crate::domain::audit::AuditTrailEntry;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuditSinkError {
    #[error("Audit write failed: {0}")]
    Io(String),
    #[error("Audit serialization failed: {0}")]
    Serialization(String),
}

/// Durable storage for audit entries, written before an entry joins the
/// in-memory chain
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, entry: &AuditTrailEntry) -> Result<(), AuditSinkError>;
}
