//! Preflight Guard
//!
//! Turns a `SimulationResult` into an approve/deny decision with a
//! human-readable reason, keeps a bounded per-agent history for statistics,
//! and records each decision in the audit trail on a best-effort basis.
//! The audit write outcome is returned next to the decision and never
//! changes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use super::audit::{AuditDecision, AuditTrail, AuditWrite, EventSource, SecurityEvent};
use super::simulation::{SimulationResult, TransactionSimulator};
use super::trade::TradeAction;

/// Decisions retained per agent
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightRequest {
    pub agent_id: String,
    /// Encoded wire transaction (base64 or base58)
    pub transaction: String,
    pub wallet_address: String,
    /// Expected wallet balance change in SOL
    pub expected_balance_change: f64,
    pub action: TradeAction,
    #[serde(default)]
    pub token_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightDecision {
    pub approved: bool,
    pub simulation: SimulationResult,
    pub action: TradeAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A decision plus what happened when recording it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightOutcome {
    pub decision: PreflightDecision,
    pub audit: AuditWrite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightStats {
    pub total: usize,
    pub approved: usize,
    pub blocked: usize,
    pub block_reasons: Vec<String>,
}

/// Human-readable reason for a simulation outcome
pub fn describe(result: &SimulationResult) -> String {
    if !result.success {
        return format!(
            "Simulation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    if result.risk_flags.is_empty() {
        return "Transaction passed all preflight checks".to_string();
    }

    let critical: Vec<String> = result
        .critical_flags()
        .map(|f| format!("{} ({})", f.flag_type, f.message))
        .collect();
    if !critical.is_empty() {
        return format!("Blocked by critical risk flags: {}", critical.join("; "));
    }

    let warnings: Vec<String> = result
        .risk_flags
        .iter()
        .map(|f| format!("{} ({})", f.flag_type, f.message))
        .collect();
    format!("Approved with warnings: {}", warnings.join("; "))
}

pub struct PreflightGuard {
    simulator: Arc<TransactionSimulator>,
    audit: Option<Arc<AuditTrail>>,
    history: RwLock<HashMap<String, VecDeque<PreflightDecision>>>,
    history_limit: usize,
}

impl PreflightGuard {
    pub fn new(simulator: Arc<TransactionSimulator>) -> Self {
        Self {
            simulator,
            audit: None,
            history: RwLock::new(HashMap::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_audit_trail(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn simulator(&self) -> &Arc<TransactionSimulator> {
        &self.simulator
    }

    pub async fn evaluate(&self, request: &PreflightRequest) -> PreflightOutcome {
        let simulation = self
            .simulator
            .simulate(
                &request.transaction,
                &request.wallet_address,
                request.expected_balance_change,
            )
            .await;

        let decision = PreflightDecision {
            approved: simulation.approved,
            reason: describe(&simulation),
            simulation,
            action: request.action,
            timestamp: Utc::now(),
        };

        if decision.approved {
            tracing::info!(agent = %request.agent_id, action = %request.action, "Preflight approved: {}", decision.reason);
        } else {
            tracing::warn!(agent = %request.agent_id, action = %request.action, "Preflight blocked: {}", decision.reason);
        }

        self.record(&request.agent_id, decision.clone());
        let audit = self.write_audit(request, &decision).await;

        PreflightOutcome { decision, audit }
    }

    fn record(&self, agent_id: &str, decision: PreflightDecision) {
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        let ring = history.entry(agent_id.to_string()).or_default();
        while ring.len() >= self.history_limit {
            ring.pop_front();
        }
        ring.push_back(decision);
    }

    async fn write_audit(&self, request: &PreflightRequest, decision: &PreflightDecision) -> AuditWrite {
        let Some(audit) = &self.audit else {
            return AuditWrite::Skipped;
        };

        let flags: Vec<&str> = decision
            .simulation
            .risk_flags
            .iter()
            .map(|f| f.flag_type.as_str())
            .collect();
        let mut event = SecurityEvent::new(
            EventSource::Preflight,
            AuditDecision::from_approved(decision.approved),
            decision.reason.clone(),
        )
        .with_agent(request.agent_id.clone())
        .with_metadata(json!({
            "action": request.action,
            "wallet_address": request.wallet_address,
            "expected_balance_change": request.expected_balance_change,
            "balance_change": decision.simulation.balance_change,
            "slippage_percent": decision.simulation.slippage_percent,
            "risk_flags": flags,
        }));
        if let Some(token) = &request.token_address {
            event = event.with_token(token.clone());
        }

        AuditWrite::from_result(audit.log_security_event(event).await)
    }

    pub fn get_stats(&self, agent_id: &str) -> PreflightStats {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let Some(ring) = history.get(agent_id) else {
            return PreflightStats::default();
        };

        let approved = ring.iter().filter(|d| d.approved).count();
        PreflightStats {
            total: ring.len(),
            approved,
            blocked: ring.len() - approved,
            block_reasons: ring
                .iter()
                .filter(|d| !d.approved)
                .map(|d| d.reason.clone())
                .collect(),
        }
    }

    /// Most recent decisions first
    pub fn get_history(&self, agent_id: &str, limit: Option<usize>) -> Vec<PreflightDecision> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history
            .get(agent_id)
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::simulation::SimulatorConfig;
    use crate::ports::mocks::{MockAuditSink, MockSimulation};
    use crate::ports::simulation::{RawSimulation, SimulationError};

    const SOL: u64 = 1_000_000_000;

    fn request(agent: &str) -> PreflightRequest {
        PreflightRequest {
            agent_id: agent.to_string(),
            transaction: "AQAB".to_string(),
            wallet_address: "wallet".to_string(),
            expected_balance_change: -1.0,
            action: TradeAction::Buy,
            token_address: Some("TokenMint111".to_string()),
        }
    }

    fn guard(mock: MockSimulation) -> PreflightGuard {
        let simulator = TransactionSimulator::new(Arc::new(mock), SimulatorConfig::default());
        PreflightGuard::new(Arc::new(simulator))
    }

    fn clean() -> MockSimulation {
        MockSimulation::new().with_result(RawSimulation::new(10 * SOL, 9 * SOL, vec![]))
    }

    #[tokio::test]
    async fn test_clean_transaction_approved() {
        let outcome = guard(clean()).evaluate(&request("a")).await;
        assert!(outcome.decision.approved);
        assert_eq!(outcome.decision.reason, "Transaction passed all preflight checks");
        assert_eq!(outcome.audit, AuditWrite::Skipped);
    }

    #[tokio::test]
    async fn test_reasons_are_distinct() {
        let failed = guard(MockSimulation::new().with_error(SimulationError::Rpc("down".to_string())))
            .evaluate(&request("a"))
            .await;
        assert!(failed.decision.reason.starts_with("Simulation failed"));

        // 10 SOL -> 4 SOL: excessive loss (critical) and 500% slippage vs -1.0 expected
        let blocked = guard(MockSimulation::new().with_result(RawSimulation::new(10 * SOL, 4 * SOL, vec![])))
            .evaluate(&request("a"))
            .await;
        assert!(!blocked.decision.approved);
        assert!(blocked.decision.reason.starts_with("Blocked by critical risk flags"));
        assert!(blocked.decision.reason.contains("EXCESSIVE_LOSS"));
        assert!(blocked.decision.reason.contains("HIGH_SLIPPAGE"));

        // -1.1 vs -1.0 expected: 10% slippage warning only
        let warned = guard(MockSimulation::new().with_result(RawSimulation::new(
            10 * SOL,
            10 * SOL - 1_100_000_000,
            vec![],
        )))
        .evaluate(&request("a"))
        .await;
        assert!(warned.decision.approved);
        assert!(warned.decision.reason.starts_with("Approved with warnings"));
    }

    #[tokio::test]
    async fn test_history_is_capped_fifo() {
        let guard = guard(clean()).with_history_limit(3);
        for _ in 0..5 {
            guard.evaluate(&request("a")).await;
        }
        let history = guard.get_history("a", None);
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(guard.get_history("a", Some(1)).len(), 1);
        assert!(guard.get_history("nobody", None).is_empty());
    }

    #[tokio::test]
    async fn test_default_history_limit() {
        let guard = guard(clean());
        for _ in 0..(DEFAULT_HISTORY_LIMIT + 5) {
            guard.evaluate(&request("a")).await;
        }
        assert_eq!(guard.get_stats("a").total, DEFAULT_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_stats() {
        let mock = MockSimulation::new()
            .with_result(RawSimulation::new(10 * SOL, 9 * SOL, vec![]))
            .then_error(SimulationError::Rpc("down".to_string()));
        let guard = guard(mock);

        guard.evaluate(&request("a")).await;
        guard.evaluate(&request("a")).await;
        guard.evaluate(&request("b")).await;

        let stats = guard.get_stats("a");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.block_reasons.len(), 1);
        assert!(stats.block_reasons[0].contains("down"));
        assert_eq!(guard.get_stats("b").total, 1);
        assert_eq!(guard.get_stats("nobody"), PreflightStats::default());
    }

    #[tokio::test]
    async fn test_audit_recorded() {
        let audit = Arc::new(AuditTrail::new());
        let guard = guard(clean()).with_audit_trail(audit.clone());

        let outcome = guard.evaluate(&request("a")).await;
        assert!(outcome.audit.is_recorded());

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, EventSource::Preflight);
        assert_eq!(entries[0].decision, AuditDecision::Approved);
        assert_eq!(entries[0].token_address.as_deref(), Some("TokenMint111"));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_decision() {
        let sink = Arc::new(MockAuditSink::new());
        sink.set_failing(true);
        let audit = Arc::new(AuditTrail::new().with_sink(sink));
        let guard = guard(clean()).with_audit_trail(audit.clone());

        let outcome = guard.evaluate(&request("a")).await;
        assert!(outcome.decision.approved);
        assert!(matches!(outcome.audit, AuditWrite::Failed { .. }));
        assert_eq!(guard.get_stats("a").total, 1);
        assert!(audit.is_empty().await);
    }
}
