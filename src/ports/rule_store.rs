use async_trait::async_trait;
use thiserror::Error;

use crate::domain::rule_versions::RuleVersion;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleStoreError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),
    #[error("Rule version conflict: {0}")]
    Conflict(String),
}

/// Persistence collaborator for versioned rules.
///
/// Versions are append-only: a store never edits or deletes a version it
/// has accepted.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Every version of every rule, in any order
    async fn list_versions(&self) -> Result<Vec<RuleVersion>, RuleStoreError>;

    /// Persist one new version
    async fn insert_version(&self, version: RuleVersion) -> Result<(), RuleStoreError>;
}
