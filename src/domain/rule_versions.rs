//! Rule Version Store
//!
//! Resolves the effective rule set from an append-only version history.
//! Every mutation creates a new version that only becomes effective after an
//! activation delay (one hour by default), so a compromised admin session
//! cannot loosen limits and trade on them before anyone notices.
//!
//! Resolution is cached briefly; the cache is dropped the instant a new
//! version is written and never outlives the next scheduled activation. A
//! resolution that raced a write is returned but not cached.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use super::rule_engine::RuleEngine;
use super::rules::{RuleError, RulePatch, SupervisorRule};
use crate::ports::rule_store::{RuleStore, RuleStoreError};

/// Default delay before a new rule version takes effect (seconds)
pub const DEFAULT_ACTIVATION_DELAY_SECS: i64 = 3600;

/// Default lifetime of a resolved rule set (seconds)
pub const DEFAULT_CACHE_TTL_SECS: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleVersionError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] RuleStoreError),

    #[error("Rule already exists: {0}")]
    AlreadyExists(String),
}

/// One immutable version of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule: SupervisorRule,
    /// Per-rule version number, starting at 1
    pub version: u32,
    pub effective_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Global insertion order, breaks `effective_at` ties
    pub sequence: u64,
}

impl RuleVersion {
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_at <= now
    }
}

#[derive(Debug, Clone)]
struct CachedRules {
    rules: Vec<SupervisorRule>,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CachedRules {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.fetched_at && now < self.expires_at
    }
}

/// Versioned rule resolution on top of a `RuleStore`
pub struct RuleVersionStore {
    store: Arc<dyn RuleStore>,
    activation_delay: Duration,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedRules>>,
    /// Bumped on every invalidation
    generation: AtomicU64,
    /// Serializes writers so version and sequence numbers stay unique
    write_lock: tokio::sync::Mutex<()>,
}

impl RuleVersionStore {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self::with_config(
            store,
            Duration::seconds(DEFAULT_ACTIVATION_DELAY_SECS),
            Duration::seconds(DEFAULT_CACHE_TTL_SECS),
        )
    }

    pub fn with_config(store: Arc<dyn RuleStore>, activation_delay: Duration, cache_ttl: Duration) -> Self {
        Self {
            store,
            activation_delay: activation_delay.max(Duration::zero()),
            cache_ttl,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn activation_delay(&self) -> Duration {
        self.activation_delay
    }

    /// Seed version 1 of each rule, effective immediately, if the store is empty.
    ///
    /// Returns the number of rules inserted (zero when the store already has
    /// history).
    pub async fn bootstrap(&self, rules: Vec<SupervisorRule>) -> Result<usize, RuleVersionError> {
        self.bootstrap_at(rules, Utc::now()).await
    }

    pub async fn bootstrap_at(
        &self,
        rules: Vec<SupervisorRule>,
        now: DateTime<Utc>,
    ) -> Result<usize, RuleVersionError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.list_versions().await?.is_empty() {
            tracing::debug!("Rule store already seeded, skipping bootstrap");
            return Ok(0);
        }

        let count = rules.len();
        for (index, rule) in rules.into_iter().enumerate() {
            self.store
                .insert_version(RuleVersion {
                    rule,
                    version: 1,
                    effective_at: now,
                    created_at: now,
                    sequence: index as u64 + 1,
                })
                .await?;
        }
        self.invalidate_cache();
        tracing::info!("Seeded rule store with {} rules", count);
        Ok(count)
    }

    /// The rules in effect right now
    pub async fn get_effective_rules(&self) -> Result<Vec<SupervisorRule>, RuleVersionError> {
        self.effective_rules_at(Utc::now()).await
    }

    pub async fn effective_rules_at(&self, now: DateTime<Utc>) -> Result<Vec<SupervisorRule>, RuleVersionError> {
        if let Some(rules) = self.cached(now) {
            return Ok(rules);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let versions = self.store.list_versions().await?;
        let rules = resolve_effective(&versions, now);

        let next_activation = versions
            .iter()
            .filter(|v| v.effective_at > now)
            .map(|v| v.effective_at)
            .min();
        let mut expires_at = saturating_add(now, self.cache_ttl);
        if let Some(next) = next_activation {
            expires_at = expires_at.min(next);
        }

        if let Ok(mut cache) = self.cache.write() {
            if self.generation.load(Ordering::Acquire) == generation {
                *cache = Some(CachedRules {
                    rules: rules.clone(),
                    fetched_at: now,
                    expires_at,
                });
            } else {
                tracing::debug!("Rule set changed during resolution, not caching");
            }
        }
        Ok(rules)
    }

    /// Build an engine over the currently effective rules
    pub async fn engine(&self) -> Result<RuleEngine, RuleVersionError> {
        self.engine_at(Utc::now()).await
    }

    pub async fn engine_at(&self, now: DateTime<Utc>) -> Result<RuleEngine, RuleVersionError> {
        Ok(RuleEngine::new(self.effective_rules_at(now).await?))
    }

    /// Schedule a patched version of `rule_id` after the default delay
    pub async fn update_rule(&self, rule_id: &str, patch: &RulePatch) -> Result<RuleVersion, RuleVersionError> {
        self.update_rule_at(rule_id, patch, self.activation_delay, Utc::now()).await
    }

    /// Schedule a patched version with an explicit delay.
    ///
    /// The patch applies to the most recently created version, pending or
    /// not, so consecutive updates compose. Negative delays are clamped to
    /// zero: a version can never be backdated.
    pub async fn update_rule_at(
        &self,
        rule_id: &str,
        patch: &RulePatch,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<RuleVersion, RuleVersionError> {
        let _guard = self.write_lock.lock().await;
        let versions = self.store.list_versions().await?;

        let base = versions
            .iter()
            .filter(|v| v.rule.id == rule_id)
            .max_by_key(|v| v.sequence)
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;

        let rule = base.rule.patched(patch)?;
        let version = RuleVersion {
            rule,
            version: base.version + 1,
            effective_at: saturating_add(now, delay.max(Duration::zero())),
            created_at: now,
            sequence: next_sequence(&versions),
        };

        self.store.insert_version(version.clone()).await?;
        self.invalidate_cache();

        tracing::info!(
            "Rule {} version {} scheduled, effective at {}",
            rule_id,
            version.version,
            version.effective_at
        );
        Ok(version)
    }

    /// Add a brand new rule, effective after the default delay
    pub async fn create_rule(&self, rule: SupervisorRule) -> Result<RuleVersion, RuleVersionError> {
        self.create_rule_at(rule, self.activation_delay, Utc::now()).await
    }

    pub async fn create_rule_at(
        &self,
        rule: SupervisorRule,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<RuleVersion, RuleVersionError> {
        rule.params.validate().map_err(|reason| RuleError::InvalidParams {
            rule_id: rule.id.clone(),
            reason,
        })?;

        let _guard = self.write_lock.lock().await;
        let versions = self.store.list_versions().await?;
        if versions.iter().any(|v| v.rule.id == rule.id) {
            return Err(RuleVersionError::AlreadyExists(rule.id));
        }

        let version = RuleVersion {
            rule,
            version: 1,
            effective_at: saturating_add(now, delay.max(Duration::zero())),
            created_at: now,
            sequence: next_sequence(&versions),
        };
        self.store.insert_version(version.clone()).await?;
        self.invalidate_cache();

        tracing::info!(
            "Rule {} created, effective at {}",
            version.rule.id,
            version.effective_at
        );
        Ok(version)
    }

    /// Versions not yet in effect, soonest first
    pub async fn pending_changes(&self) -> Result<Vec<RuleVersion>, RuleVersionError> {
        self.pending_changes_at(Utc::now()).await
    }

    pub async fn pending_changes_at(&self, now: DateTime<Utc>) -> Result<Vec<RuleVersion>, RuleVersionError> {
        let mut pending: Vec<RuleVersion> = self
            .store
            .list_versions()
            .await?
            .into_iter()
            .filter(|v| !v.is_effective_at(now))
            .collect();
        pending.sort_by(|a, b| a.effective_at.cmp(&b.effective_at).then(a.sequence.cmp(&b.sequence)));
        Ok(pending)
    }

    /// Every version of one rule in creation order
    pub async fn history(&self, rule_id: &str) -> Result<Vec<RuleVersion>, RuleVersionError> {
        let mut versions: Vec<RuleVersion> = self
            .store
            .list_versions()
            .await?
            .into_iter()
            .filter(|v| v.rule.id == rule_id)
            .collect();
        versions.sort_by_key(|v| v.sequence);
        Ok(versions)
    }

    pub fn invalidate_cache(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<Vec<SupervisorRule>> {
        let cache = self.cache.read().ok()?;
        cache
            .as_ref()
            .filter(|c| c.is_fresh(now))
            .map(|c| c.rules.clone())
    }
}

fn saturating_add(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn next_sequence(versions: &[RuleVersion]) -> u64 {
    versions.iter().map(|v| v.sequence).max().unwrap_or(0) + 1
}

/// Pick, per rule id, the latest version effective at `now`.
///
/// Ties on `effective_at` go to the later-created version. Output order
/// follows each rule's first creation so reports stay reproducible.
pub fn resolve_effective(versions: &[RuleVersion], now: DateTime<Utc>) -> Vec<SupervisorRule> {
    let mut first_seen: HashMap<&str, u64> = HashMap::new();
    let mut chosen: HashMap<&str, &RuleVersion> = HashMap::new();

    for version in versions {
        let id = version.rule.id.as_str();
        let first = first_seen.entry(id).or_insert(version.sequence);
        *first = (*first).min(version.sequence);

        if !version.is_effective_at(now) {
            continue;
        }
        let newer = match chosen.get(id) {
            Some(current) => {
                (version.effective_at, version.sequence) > (current.effective_at, current.sequence)
            }
            None => true,
        };
        if newer {
            chosen.insert(id, version);
        }
    }

    let mut resolved: Vec<(&u64, &RuleVersion)> = chosen
        .iter()
        .filter_map(|(id, v)| first_seen.get(id).map(|seq| (seq, *v)))
        .collect();
    resolved.sort_by_key(|(seq, _)| **seq);
    resolved.into_iter().map(|(_, v)| v.rule.clone()).collect()
}
