//! Audit Trail
//!
//! Append-only, hash-chained ledger of every safety decision. Each entry's
//! hash is a SHA-256 digest over its own content plus the previous entry's
//! hash, so any retroactive edit breaks the chain.
//!
//! Appends are serialized behind a single async mutex that is held while
//! the hash is computed, the entry is anchored and persisted, and the entry
//! is pushed. Two concurrent appends can never link to the same predecessor.
//!
//! Integrity failures are reported, never repaired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ports::anchor::AnchorPort;
use crate::ports::audit_sink::{AuditSink, AuditSinkError};

/// Default page size for trail queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Default deadline for one anchoring call
pub const DEFAULT_ANCHOR_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Sink(#[from] AuditSinkError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Approved,
    Rejected,
    Pending,
}

impl AuditDecision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            AuditDecision::Approved
        } else {
            AuditDecision::Rejected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Approved => "approved",
            AuditDecision::Rejected => "rejected",
            AuditDecision::Pending => "pending",
        }
    }
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    RuleEngine,
    CircuitBreaker,
    Preflight,
    Operator,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::RuleEngine => "rule_engine",
            EventSource::CircuitBreaker => "circuit_breaker",
            EventSource::Preflight => "preflight",
            EventSource::Operator => "operator",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A safety decision to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub source: EventSource,
    pub decision: AuditDecision,
    pub reason: String,
    pub agent_id: Option<String>,
    pub token_address: Option<String>,
    pub metadata: Option<Value>,
}

impl SecurityEvent {
    pub fn new(source: EventSource, decision: AuditDecision, reason: impl Into<String>) -> Self {
        Self {
            source,
            decision,
            reason: reason.into(),
            agent_id: None,
            token_address: None,
            metadata: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_token(mut self, token_address: impl Into<String>) -> Self {
        self.token_address = Some(token_address.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the preceding entry, `None` only for the first entry
    pub previous_hash: Option<String>,
    pub hash: String,
    /// Opaque reference returned by the anchoring service
    pub on_chain_proof: Option<String>,
    pub agent_id: Option<String>,
    pub token_address: Option<String>,
    pub decision: AuditDecision,
    pub reason: String,
    pub metadata: Option<Value>,
    pub source: EventSource,
}

/// Hashed view of an entry: everything except `hash` and `on_chain_proof`.
/// Field order is fixed and JSON object keys are sorted, so the encoding is
/// canonical.
#[derive(Serialize)]
struct HashedContent<'a> {
    id: &'a str,
    timestamp: &'a DateTime<Utc>,
    previous_hash: Option<&'a str>,
    agent_id: Option<&'a str>,
    token_address: Option<&'a str>,
    decision: AuditDecision,
    reason: &'a str,
    metadata: Option<&'a Value>,
    source: EventSource,
}

impl AuditTrailEntry {
    fn from_event(event: SecurityEvent, previous_hash: Option<String>, now: DateTime<Utc>) -> Result<Self, AuditError> {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            previous_hash,
            hash: String::new(),
            on_chain_proof: None,
            agent_id: event.agent_id,
            token_address: event.token_address,
            decision: event.decision,
            reason: event.reason,
            metadata: event.metadata,
            source: event.source,
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Fresh SHA-256 digest of this entry's content, hex encoded
    pub fn compute_hash(&self) -> Result<String, AuditError> {
        let content = HashedContent {
            id: &self.id,
            timestamp: &self.timestamp,
            previous_hash: self.previous_hash.as_deref(),
            agent_id: self.agent_id.as_deref(),
            token_address: self.token_address.as_deref(),
            decision: self.decision,
            reason: &self.reason,
            metadata: self.metadata.as_ref(),
            source: self.source,
        };
        let bytes = serde_json::to_vec(&content)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn hash_matches(&self) -> bool {
        self.compute_hash().map(|h| h == self.hash).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub invalid_entries: Vec<String>,
}

/// Check every link and every stored hash of a trail.
///
/// An entry is invalid if its `previous_hash` does not equal its
/// predecessor's `hash` (or is set on the first entry), or if its own
/// `hash` does not match a fresh digest of its content.
pub fn verify_chain(entries: &[AuditTrailEntry]) -> IntegrityReport {
    let mut invalid_entries = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let expected_previous = if i == 0 {
            None
        } else {
            Some(entries[i - 1].hash.as_str())
        };
        let linked = entry.previous_hash.as_deref() == expected_previous;

        if !linked || !entry.hash_matches() {
            invalid_entries.push(entry.id.clone());
        }
    }

    if !invalid_entries.is_empty() {
        tracing::error!(
            invalid = invalid_entries.len(),
            total = entries.len(),
            "Audit trail integrity check failed"
        );
    }

    IntegrityReport {
        valid: invalid_entries.is_empty(),
        invalid_entries,
    }
}

/// Filter and pagination for `query_trail`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailQuery {
    pub agent_id: Option<String>,
    pub token_address: Option<String>,
    pub decision: Option<AuditDecision>,
    pub source: Option<EventSource>,
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for TrailQuery {
    fn default() -> Self {
        Self {
            agent_id: None,
            token_address: None,
            decision: None,
            source: None,
            start: None,
            end: None,
            offset: 0,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl TrailQuery {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &AuditTrailEntry) -> bool {
        if let Some(agent) = &self.agent_id {
            if entry.agent_id.as_ref() != Some(agent) {
                return false;
            }
        }
        if let Some(token) = &self.token_address {
            if entry.token_address.as_ref() != Some(token) {
                return false;
            }
        }
        if self.decision.is_some_and(|d| d != entry.decision) {
            return false;
        }
        if self.source.is_some_and(|s| s != entry.source) {
            return false;
        }
        if self.start.is_some_and(|start| entry.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| entry.timestamp > end) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailPage {
    /// Newest first
    pub entries: Vec<AuditTrailEntry>,
    /// Matching entries before pagination
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("Unknown export format: {}", other)),
        }
    }
}

const CSV_HEADER: &str =
    "id,timestamp,previous_hash,hash,on_chain_proof,agent_id,token_address,decision,source,reason,metadata";

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Serialize entries in trail order
pub fn export_entries(entries: &[AuditTrailEntry], format: ExportFormat) -> Result<String, AuditError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => {
            let mut out = String::from(CSV_HEADER);
            out.push('\n');
            for entry in entries {
                let metadata = match &entry.metadata {
                    Some(value) => serde_json::to_string(value)?,
                    None => String::new(),
                };
                let row = [
                    entry.id.clone(),
                    entry.timestamp.to_rfc3339(),
                    entry.previous_hash.clone().unwrap_or_default(),
                    entry.hash.clone(),
                    entry.on_chain_proof.clone().unwrap_or_default(),
                    entry.agent_id.clone().unwrap_or_default(),
                    entry.token_address.clone().unwrap_or_default(),
                    entry.decision.to_string(),
                    entry.source.to_string(),
                    entry.reason.clone(),
                    metadata,
                ];
                let line: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
                out.push_str(&line.join(","));
                out.push('\n');
            }
            Ok(out)
        }
    }
}

/// Outcome of a best-effort audit write that must not alter the decision
/// it records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditWrite {
    Recorded { entry_id: String },
    Failed { error: String },
    Skipped,
}

impl AuditWrite {
    pub fn from_result(result: Result<AuditTrailEntry, AuditError>) -> Self {
        match result {
            Ok(entry) => AuditWrite::Recorded { entry_id: entry.id },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write audit trail entry");
                AuditWrite::Failed { error: e.to_string() }
            }
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, AuditWrite::Recorded { .. })
    }
}

pub struct AuditTrail {
    entries: Mutex<Vec<AuditTrailEntry>>,
    anchor: Option<Arc<dyn AnchorPort>>,
    sink: Option<Arc<dyn AuditSink>>,
    anchor_timeout: Duration,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Resume a trail previously persisted; the chain is not re-verified
    pub fn from_entries(entries: Vec<AuditTrailEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            anchor: None,
            sink: None,
            anchor_timeout: Duration::from_millis(DEFAULT_ANCHOR_TIMEOUT_MS),
        }
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn AnchorPort>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_anchor_timeout(mut self, timeout_ms: u64) -> Self {
        self.anchor_timeout = Duration::from_millis(timeout_ms);
        self
    }

    /// Append one event, stamped once the chain is locked
    pub async fn log_security_event(&self, event: SecurityEvent) -> Result<AuditTrailEntry, AuditError> {
        self.append(event, None).await
    }

    /// Append one event.
    ///
    /// Anchoring failures leave the entry without a proof. A sink failure
    /// rejects the append: the entry is not added to the chain. Timestamps
    /// never decrease along the chain, so `now` is raised to the previous
    /// entry's timestamp if it is earlier.
    pub async fn log_security_event_at(
        &self,
        event: SecurityEvent,
        now: DateTime<Utc>,
    ) -> Result<AuditTrailEntry, AuditError> {
        self.append(event, Some(now)).await
    }

    async fn append(&self, event: SecurityEvent, now: Option<DateTime<Utc>>) -> Result<AuditTrailEntry, AuditError> {
        let mut entries = self.entries.lock().await;

        let now = now.unwrap_or_else(Utc::now);
        let now = entries.last().map_or(now, |last| now.max(last.timestamp));
        let previous_hash = entries.last().map(|e| e.hash.clone());
        let mut entry = AuditTrailEntry::from_event(event, previous_hash, now)?;
        entry.on_chain_proof = self.anchor_entry(&entry).await;

        if let Some(sink) = &self.sink {
            sink.persist(&entry).await?;
        }

        tracing::debug!(
            id = %entry.id,
            decision = %entry.decision,
            source = %entry.source,
            anchored = entry.on_chain_proof.is_some(),
            "Audit entry appended"
        );
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn anchor_entry(&self, entry: &AuditTrailEntry) -> Option<String> {
        let anchor = self.anchor.as_ref()?;
        match tokio::time::timeout(self.anchor_timeout, anchor.anchor(entry)).await {
            Ok(Ok(proof)) => Some(proof),
            Ok(Err(e)) => {
                tracing::warn!(id = %entry.id, error = %e, "Anchoring failed, entry recorded without proof");
                None
            }
            Err(_) => {
                tracing::warn!(
                    id = %entry.id,
                    timeout_ms = self.anchor_timeout.as_millis() as u64,
                    "Anchoring timed out, entry recorded without proof"
                );
                None
            }
        }
    }

    pub async fn query_trail(&self, query: &TrailQuery) -> TrailPage {
        let entries = self.entries.lock().await;

        let mut matching: Vec<&AuditTrailEntry> =
            entries.iter().rev().filter(|e| query.matches(e)).collect();
        // Stable sort keeps later appends first among equal timestamps
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();

        TrailPage { entries, total }
    }

    pub async fn verify_trail_integrity(&self) -> IntegrityReport {
        let entries = self.entries.lock().await;
        verify_chain(&entries)
    }

    pub async fn export_trail(&self, format: ExportFormat) -> Result<String, AuditError> {
        let entries = self.entries.lock().await;
        export_entries(&entries, format)
    }

    pub async fn entries(&self) -> Vec<AuditTrailEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn last_hash(&self) -> Option<String> {
        self.entries.lock().await.last().map(|e| e.hash.clone())
    }

    #[cfg(test)]
    pub(crate) async fn tamper<F: FnOnce(&mut AuditTrailEntry)>(&self, index: usize, f: F) {
        if let Some(entry) = self.entries.lock().await.get_mut(index) {
            f(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{MockAnchor, MockAuditSink};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn event(agent: &str, decision: AuditDecision) -> SecurityEvent {
        SecurityEvent::new(EventSource::RuleEngine, decision, "test decision").with_agent(agent)
    }

    #[tokio::test]
    async fn test_chain_links_entries() {
        let trail = AuditTrail::new();
        let first = trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();
        let second = trail.log_security_event(event("a", AuditDecision::Rejected)).await.unwrap();

        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(first.hash.len(), 64);
        assert_ne!(first.hash, second.hash);
        assert_eq!(trail.last_hash().await, Some(second.hash));
    }

    #[tokio::test]
    async fn test_unmodified_trail_is_valid() {
        let trail = AuditTrail::new();
        for i in 0..10 {
            let ev = event(&format!("agent-{}", i % 3), AuditDecision::Approved)
                .with_metadata(json!({ "amount_sol": 1.5 * i as f64, "tags": ["a", "b"] }));
            trail.log_security_event(ev).await.unwrap();
        }

        let report = trail.verify_trail_integrity().await;
        assert!(report.valid);
        assert!(report.invalid_entries.is_empty());
    }

    #[tokio::test]
    async fn test_mutated_reason_detected() {
        let trail = AuditTrail::new();
        for _ in 0..5 {
            trail.log_security_event(event("a", AuditDecision::Rejected)).await.unwrap();
        }
        trail.tamper(2, |e| e.reason = "nothing to see here".to_string()).await;
        let tampered_id = trail.entries().await[2].id.clone();

        let report = trail.verify_trail_integrity().await;
        assert!(!report.valid);
        assert_eq!(report.invalid_entries, vec![tampered_id]);
    }

    #[tokio::test]
    async fn test_broken_link_detected() {
        let trail = AuditTrail::new();
        for _ in 0..3 {
            trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();
        }
        // Rewrite entry 1 consistently with itself but not with entry 0
        trail
            .tamper(1, |e| {
                e.previous_hash = Some("0".repeat(64));
                e.hash = e.compute_hash().unwrap();
            })
            .await;
        let entries = trail.entries().await;

        let report = verify_chain(&entries);
        // entry 1 fails its link; entry 2 now points at a stale hash
        assert_eq!(report.invalid_entries, vec![entries[1].id.clone(), entries[2].id.clone()]);
    }

    #[tokio::test]
    async fn test_first_entry_checked() {
        let trail = AuditTrail::new();
        trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();
        trail.tamper(0, |e| e.decision = AuditDecision::Approved).await;
        assert!(trail.verify_trail_integrity().await.valid);

        trail.tamper(0, |e| e.agent_id = Some("b".to_string())).await;
        assert!(!trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_entries_survive_json_roundtrip() {
        let trail = AuditTrail::new();
        for i in 0..4 {
            let ev = event("a", AuditDecision::Approved).with_metadata(json!({ "slippage": 0.1 * i as f64 }));
            trail.log_security_event(ev).await.unwrap();
        }
        let json = trail.export_trail(ExportFormat::Json).await.unwrap();
        let restored: Vec<AuditTrailEntry> = serde_json::from_str(&json).unwrap();

        let trail = AuditTrail::from_entries(restored);
        assert!(trail.verify_trail_integrity().await.valid);
        let next = trail.log_security_event(event("a", AuditDecision::Pending)).await.unwrap();
        assert!(next.previous_hash.is_some());
        assert!(trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_query_filters_and_paginates() {
        let trail = AuditTrail::new();
        let base = Utc::now();
        for i in 0..30 {
            let agent = if i % 2 == 0 { "x" } else { "y" };
            let decision = if i % 3 == 0 { AuditDecision::Rejected } else { AuditDecision::Approved };
            trail
                .log_security_event_at(event(agent, decision), base + ChronoDuration::seconds(i))
                .await
                .unwrap();
        }

        let page = trail
            .query_trail(&TrailQuery {
                limit: 5,
                ..TrailQuery::for_agent("x")
            })
            .await;
        assert_eq!(page.total, 15);
        assert_eq!(page.entries.len(), 5);
        assert!(page.entries.iter().all(|e| e.agent_id.as_deref() == Some("x")));
        assert!(page.entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(page.entries[0].timestamp, base + ChronoDuration::seconds(28));

        let page = trail
            .query_trail(&TrailQuery {
                offset: 10,
                ..TrailQuery::for_agent("x")
            })
            .await;
        assert_eq!(page.total, 15);
        assert_eq!(page.entries.len(), 5);

        let rejected = trail
            .query_trail(&TrailQuery {
                decision: Some(AuditDecision::Rejected),
                start: Some(base + ChronoDuration::seconds(10)),
                end: Some(base + ChronoDuration::seconds(20)),
                ..Default::default()
            })
            .await;
        // 12, 15, 18
        assert_eq!(rejected.total, 3);
    }

    #[tokio::test]
    async fn test_anchor_proof_attached() {
        let anchor = Arc::new(MockAnchor::new().with_proof("proof-123"));
        let trail = AuditTrail::new().with_anchor(anchor.clone());

        let entry = trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();
        assert_eq!(entry.on_chain_proof.as_deref(), Some("proof-123"));
        assert_eq!(anchor.get_calls(), vec![entry.hash.clone()]);
    }

    #[tokio::test]
    async fn test_anchor_failure_records_without_proof() {
        let trail = AuditTrail::new().with_anchor(Arc::new(MockAnchor::new().failing()));
        let entry = trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();

        assert!(entry.on_chain_proof.is_none());
        assert_eq!(trail.len().await, 1);
        assert!(trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_sink_failure_rejects_append() {
        let sink = Arc::new(MockAuditSink::new());
        let trail = AuditTrail::new().with_sink(sink.clone());

        trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();
        sink.set_failing(true);
        assert!(trail.log_security_event(event("a", AuditDecision::Approved)).await.is_err());
        sink.set_failing(false);
        trail.log_security_event(event("a", AuditDecision::Approved)).await.unwrap();

        assert_eq!(trail.len().await, 2);
        assert_eq!(sink.persisted().len(), 2);
        assert!(trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_chain_linear() {
        let trail = Arc::new(AuditTrail::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let trail = Arc::clone(&trail);
            handles.push(tokio::spawn(async move {
                trail
                    .log_security_event(event(&format!("agent-{}", i), AuditDecision::Approved))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(trail.len().await, 32);
        assert!(trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_timestamps_follow_chain_order() {
        let trail = Arc::new(AuditTrail::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let trail = Arc::clone(&trail);
            handles.push(tokio::spawn(async move {
                trail
                    .log_security_event(event(&format!("agent-{}", i), AuditDecision::Approved))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let base = Utc::now();
        trail
            .log_security_event_at(event("late", AuditDecision::Approved), base + ChronoDuration::hours(1))
            .await
            .unwrap();
        let stale = trail
            .log_security_event_at(event("stale", AuditDecision::Approved), base - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(stale.timestamp, base + ChronoDuration::hours(1));

        let entries = trail.entries().await;
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(trail.verify_trail_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_csv_export_escapes() {
        let trail = AuditTrail::new();
        let ev = SecurityEvent::new(EventSource::Operator, AuditDecision::Pending, "limit \"raised\", see ticket")
            .with_agent("ops");
        trail.log_security_event(ev).await.unwrap();

        let csv = trail.export_trail(ExportFormat::Csv).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("\"limit \"\"raised\"\", see ticket\""));
        assert!(lines[1].contains(",pending,operator,"));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
