//! In-memory rule store
//!
//! Append-only version list behind a lock. Used for single-process
//! deployments and tests; durable stores implement the same port.

use async_trait::async_trait;
use std::sync::RwLock;

use crate::domain::rule_versions::RuleVersion;
use crate::ports::rule_store::{RuleStore, RuleStoreError};

#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    versions: RwLock<Vec<RuleVersion>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing history
    pub fn with_versions(versions: Vec<RuleVersion>) -> Self {
        Self {
            versions: RwLock::new(versions),
        }
    }

    pub fn len(&self) -> usize {
        self.versions.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_versions(&self) -> Result<Vec<RuleVersion>, RuleStoreError> {
        self.versions
            .read()
            .map(|v| v.clone())
            .map_err(|e| RuleStoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    async fn insert_version(&self, version: RuleVersion) -> Result<(), RuleStoreError> {
        let mut versions = self
            .versions
            .write()
            .map_err(|e| RuleStoreError::Unavailable(format!("lock poisoned: {}", e)))?;

        if versions.iter().any(|v| v.sequence == version.sequence) {
            return Err(RuleStoreError::Conflict(format!(
                "sequence {} already used",
                version.sequence
            )));
        }
        versions.push(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::{RuleParams, SupervisorRule};
    use chrono::Utc;

    fn version(sequence: u64) -> RuleVersion {
        RuleVersion {
            rule: SupervisorRule::new("r", RuleParams::MinLiquidity { min_usd: 1.0 }, ""),
            version: sequence as u32,
            effective_at: Utc::now(),
            created_at: Utc::now(),
            sequence,
        }
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let store = InMemoryRuleStore::new();
        assert!(store.is_empty());
        store.insert_version(version(1)).await.unwrap();
        store.insert_version(version(2)).await.unwrap();
        assert_eq!(store.list_versions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let store = InMemoryRuleStore::with_versions(vec![version(1)]);
        let err = store.insert_version(version(1)).await.unwrap_err();
        assert!(matches!(err, RuleStoreError::Conflict(_)));
        assert_eq!(store.len(), 1);
    }
}
