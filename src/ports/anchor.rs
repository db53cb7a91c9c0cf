use async_trait::async_trait;
use thiserror::Error;

use crate::domain::audit::AuditTrailEntry;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnchorError {
    #[error("Anchoring service unavailable: {0}")]
    Unavailable(String),
    #[error("Anchoring rejected: {0}")]
    Rejected(String),
    #[error("Anchoring timed out after {0}ms")]
    Timeout(u64),
}

/// Publishes an audit entry's hash somewhere outside this process and
/// returns an opaque proof reference
#[async_trait]
pub trait AnchorPort: Send + Sync {
    async fn anchor(&self, entry: &AuditTrailEntry) -> Result<String, AnchorError>;
}
