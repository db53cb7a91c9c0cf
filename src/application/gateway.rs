//! Safety Gateway
//!
//! Thin composition over the safety components. A trade is checked in a
//! fixed order: circuit breaker first (cheap, fails fast), then the rules
//! effective at evaluation time, and the final decision is always written
//! to the audit trail. Whenever a check cannot complete the trade is denied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::domain::audit::{AuditDecision, AuditTrail, AuditWrite, EventSource, SecurityEvent};
use crate::domain::circuit_breaker::{
    BreakerCheck, BreakerMetrics, CircuitBreakerError, CircuitBreakerRegistry, CircuitBreakerState,
};
use crate::domain::preflight::{PreflightGuard, PreflightOutcome, PreflightRequest};
use crate::domain::rule_versions::{RuleVersion, RuleVersionError, RuleVersionStore};
use crate::domain::rules::{RulePatch, SupervisorDecision};
use crate::domain::simulation::TransactionSimulator;
use crate::domain::trade::TradeRequest;
use crate::ports::custody::{CustodyError, KeyCustodyPort};
use crate::ports::risk_data::RiskDataPort;
use crate::ports::rule_store::RuleStore;
use crate::ports::simulation::SimulationPort;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Rules(#[from] RuleVersionError),
    #[error(transparent)]
    Breaker(#[from] CircuitBreakerError),
    #[error(transparent)]
    Custody(#[from] CustodyError),
    #[error("No key custody provider configured")]
    CustodyNotConfigured,
    #[error("Wallet mismatch: custody signs for {expected}, request names {actual}")]
    WalletMismatch { expected: String, actual: String },
}

/// Component that produced the final trade decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStage {
    CircuitBreaker,
    RuleEngine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayDecision {
    pub approved: bool,
    pub stage: GatewayStage,
    pub reason: String,
    pub breaker: BreakerCheck,
    /// Absent when the breaker denied first or rules could not be resolved
    pub supervisor: Option<SupervisorDecision>,
    pub audit: AuditWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningOutcome {
    pub preflight: PreflightOutcome,
    /// Base64 signed transaction, only when preflight approved and the
    /// decision was recorded
    pub signed_transaction: Option<String>,
}

/// Result of an operator action with the outcome of its audit record.
///
/// The action has already taken effect; a `Failed` audit means it is not in
/// the trail and must be reconciled by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorOutcome<T> {
    pub result: T,
    pub audit: AuditWrite,
}

/// Breaker metrics derived from the request when the caller has none
pub fn default_metrics(request: &TradeRequest) -> BreakerMetrics {
    BreakerMetrics {
        volume: request.amount_sol,
        price_change: 0.0,
        trade_count: request.daily_trade_count,
    }
}

pub struct SafetyGateway {
    rules: Arc<RuleVersionStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    preflight: Arc<PreflightGuard>,
    audit: Arc<AuditTrail>,
    risk_data: Option<Arc<dyn RiskDataPort>>,
    custody: Option<Arc<dyn KeyCustodyPort>>,
}

impl SafetyGateway {
    pub fn new(
        rules: Arc<RuleVersionStore>,
        breakers: Arc<CircuitBreakerRegistry>,
        preflight: Arc<PreflightGuard>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            rules,
            breakers,
            preflight,
            audit,
            risk_data: None,
            custody: None,
        }
    }

    /// Wire every component from configuration.
    ///
    /// Rules still have to be seeded with `rules().bootstrap(..)`.
    pub fn from_config(
        config: &Config,
        rule_store: Arc<dyn RuleStore>,
        simulation: Arc<dyn SimulationPort>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        let rules = RuleVersionStore::with_config(
            rule_store,
            config.rules.activation_delay(),
            config.rules.cache_ttl(),
        );
        let breakers = CircuitBreakerRegistry::with_default_config(config.circuit_breaker.clone());
        let simulator = TransactionSimulator::new(simulation, config.simulator.clone());
        let preflight = PreflightGuard::new(Arc::new(simulator))
            .with_audit_trail(Arc::clone(&audit))
            .with_history_limit(config.preflight.history_limit);

        Self::new(Arc::new(rules), Arc::new(breakers), Arc::new(preflight), audit)
    }

    pub fn with_risk_data(mut self, risk_data: Arc<dyn RiskDataPort>) -> Self {
        self.risk_data = Some(risk_data);
        self
    }

    pub fn with_custody(mut self, custody: Arc<dyn KeyCustodyPort>) -> Self {
        self.custody = Some(custody);
        self
    }

    pub fn rules(&self) -> &Arc<RuleVersionStore> {
        &self.rules
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn preflight_guard(&self) -> &Arc<PreflightGuard> {
        &self.preflight
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub async fn evaluate_trade(
        &self,
        request: &TradeRequest,
        metrics: Option<BreakerMetrics>,
    ) -> GatewayDecision {
        self.evaluate_trade_at(request, metrics, Utc::now()).await
    }

    pub async fn evaluate_trade_at(
        &self,
        request: &TradeRequest,
        metrics: Option<BreakerMetrics>,
        now: DateTime<Utc>,
    ) -> GatewayDecision {
        let metrics = metrics.unwrap_or_else(|| default_metrics(request));

        let breaker = self.breakers.check_breaker_at(&request.agent_id, &metrics, now);
        if !breaker.allowed {
            let reason = breaker
                .reason
                .clone()
                .unwrap_or_else(|| "Circuit breaker open".to_string());
            tracing::warn!(agent = %request.agent_id, "Trade denied by circuit breaker: {}", reason);

            let event = trade_event(request, EventSource::CircuitBreaker, false, &reason).with_metadata(json!({
                "request": request,
                "metrics": metrics,
                "breaker_status": breaker.status,
                "tripped": breaker.tripped,
            }));
            let audit = self.record(event, now).await;
            return GatewayDecision {
                approved: false,
                stage: GatewayStage::CircuitBreaker,
                reason,
                breaker,
                supervisor: None,
                audit,
            };
        }

        let engine = match self.rules.engine_at(now).await {
            Ok(engine) => engine,
            Err(e) => {
                let reason = format!("Rule evaluation unavailable: {}", e);
                tracing::error!(agent = %request.agent_id, "Trade denied, {}", reason);

                let event = trade_event(request, EventSource::RuleEngine, false, &reason)
                    .with_metadata(json!({ "request": request }));
                let audit = self.record(event, now).await;
                return GatewayDecision {
                    approved: false,
                    stage: GatewayStage::RuleEngine,
                    reason,
                    breaker,
                    supervisor: None,
                    audit,
                };
            }
        };

        let decision = engine.evaluate_at(request, now);
        let reason = decision.summary();
        if decision.approved {
            tracing::info!(agent = %request.agent_id, token = %request.token_symbol, "Trade approved: {}", reason);
        } else {
            tracing::warn!(agent = %request.agent_id, token = %request.token_symbol, "Trade rejected: {}", reason);
        }

        let event = trade_event(request, EventSource::RuleEngine, decision.approved, &reason).with_metadata(json!({
            "request": request,
            "violations": decision.violations,
            "rules_evaluated": engine.enabled_count(),
        }));
        let audit = self.record(event, now).await;

        GatewayDecision {
            approved: decision.approved,
            stage: GatewayStage::RuleEngine,
            reason,
            breaker,
            supervisor: Some(decision),
            audit,
        }
    }

    /// Fill trust score, liquidity and market cap from the risk data
    /// provider, then evaluate. A failed lookup clears the trust score so
    /// the trust rule fails closed.
    pub async fn evaluate_trade_with_risk_data(
        &self,
        mut request: TradeRequest,
        metrics: Option<BreakerMetrics>,
    ) -> GatewayDecision {
        if let Some(provider) = &self.risk_data {
            match provider.risk_data(&request.token_address).await {
                Ok(data) => {
                    request.trust_score = data.trust_score;
                    request.token_liquidity = data.liquidity_usd;
                    request.token_market_cap = data.market_cap_usd;
                }
                Err(e) => {
                    tracing::warn!(token = %request.token_address, error = %e, "Risk data lookup failed");
                    request.trust_score = None;
                }
            }
        }
        self.evaluate_trade(&request, metrics).await
    }

    pub async fn preflight(&self, request: &PreflightRequest) -> PreflightOutcome {
        self.preflight.evaluate(request).await
    }

    /// Preflight a transaction and sign it only if it was approved and the
    /// approval was recorded.
    pub async fn sign_after_preflight(&self, request: &PreflightRequest) -> Result<SigningOutcome, GatewayError> {
        let custody = self.custody.as_ref().ok_or(GatewayError::CustodyNotConfigured)?;
        let signer = custody.public_key();
        if signer != request.wallet_address {
            return Err(GatewayError::WalletMismatch {
                expected: signer,
                actual: request.wallet_address.clone(),
            });
        }

        let preflight = self.preflight.evaluate(request).await;
        if !preflight.decision.approved {
            return Ok(SigningOutcome {
                preflight,
                signed_transaction: None,
            });
        }
        if let AuditWrite::Failed { error } = &preflight.audit {
            tracing::warn!(agent = %request.agent_id, "Not signing, approval was not recorded: {}", error);
            return Ok(SigningOutcome {
                preflight,
                signed_transaction: None,
            });
        }

        let signed = custody.sign_transaction(&request.transaction).await?;
        tracing::info!(agent = %request.agent_id, wallet = %signer, "Transaction signed after preflight");
        Ok(SigningOutcome {
            preflight,
            signed_transaction: Some(signed),
        })
    }

    /// Schedule a rule change and record it as pending
    pub async fn update_rule(
        &self,
        rule_id: &str,
        patch: &RulePatch,
    ) -> Result<OperatorOutcome<RuleVersion>, GatewayError> {
        let version = self.rules.update_rule(rule_id, patch).await?;

        let event = SecurityEvent::new(
            EventSource::Operator,
            AuditDecision::Pending,
            format!("Rule {} version {} scheduled", rule_id, version.version),
        )
        .with_metadata(json!({
            "rule": version.rule,
            "effective_at": version.effective_at,
        }));
        Ok(OperatorOutcome {
            result: version,
            audit: self.record_now(event).await,
        })
    }

    pub async fn trip_breaker(
        &self,
        agent_id: &str,
        reason: &str,
    ) -> Result<OperatorOutcome<CircuitBreakerState>, GatewayError> {
        let state = self.breakers.trip_breaker(agent_id, reason)?;
        let event = SecurityEvent::new(EventSource::Operator, AuditDecision::Rejected, format!("Breaker tripped: {}", reason))
            .with_agent(agent_id)
            .with_metadata(json!({ "status": state.status, "failure_count": state.failure_count }));
        Ok(OperatorOutcome {
            result: state,
            audit: self.record_now(event).await,
        })
    }

    pub async fn reset_breaker(&self, agent_id: &str) -> Result<OperatorOutcome<CircuitBreakerState>, GatewayError> {
        let state = self.breakers.reset_breaker(agent_id)?;
        let event = SecurityEvent::new(EventSource::Operator, AuditDecision::Approved, "Breaker reset")
            .with_agent(agent_id);
        Ok(OperatorOutcome {
            result: state,
            audit: self.record_now(event).await,
        })
    }

    async fn record(&self, event: SecurityEvent, now: DateTime<Utc>) -> AuditWrite {
        AuditWrite::from_result(self.audit.log_security_event_at(event, now).await)
    }

    async fn record_now(&self, event: SecurityEvent) -> AuditWrite {
        AuditWrite::from_result(self.audit.log_security_event(event).await)
    }
}

fn trade_event(request: &TradeRequest, source: EventSource, approved: bool, reason: &str) -> SecurityEvent {
    SecurityEvent::new(source, AuditDecision::from_approved(approved), reason)
        .with_agent(request.agent_id.clone())
        .with_token(request.token_address.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rule_store::InMemoryRuleStore;
    use crate::domain::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStatus};
    use crate::domain::rules::{default_rules, RuleType};
    use crate::domain::trade::TradeAction;
    use crate::ports::mocks::{MockAuditSink, MockSimulation, UnavailableRuleStore};

    fn request() -> TradeRequest {
        TradeRequest {
            agent_id: "agent-1".to_string(),
            action: TradeAction::Buy,
            token_address: "TokenMint111".to_string(),
            token_symbol: "TKN".to_string(),
            amount_sol: 1.0,
            portfolio_value_sol: 100.0,
            token_liquidity: 1_000_000.0,
            token_market_cap: 5_000_000.0,
            daily_trade_count: 5,
            trust_score: Some(80.0),
            current_holdings: None,
        }
    }

    async fn gateway_with(store: Arc<dyn RuleStore>) -> SafetyGateway {
        let gateway = SafetyGateway::from_config(
            &Config::default(),
            store,
            Arc::new(MockSimulation::new()),
            Arc::new(AuditTrail::new()),
        );
        // an unavailable store cannot be seeded; that is the point of those tests
        let _ = gateway.rules().bootstrap(default_rules()).await;
        gateway
    }

    #[tokio::test]
    async fn test_approved_trade_is_audited() {
        let gateway = gateway_with(Arc::new(InMemoryRuleStore::new())).await;
        let decision = gateway.evaluate_trade(&request(), None).await;

        assert!(decision.approved);
        assert_eq!(decision.stage, GatewayStage::RuleEngine);
        assert!(decision.audit.is_recorded());
        let entries = gateway.audit().entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, AuditDecision::Approved);
        assert_eq!(entries[0].agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_rule_store_failure_fails_closed() {
        let gateway = gateway_with(Arc::new(UnavailableRuleStore)).await;
        let decision = gateway.evaluate_trade(&request(), None).await;

        assert!(!decision.approved);
        assert!(decision.supervisor.is_none());
        assert!(decision.reason.contains("Rule evaluation unavailable"));
        assert_eq!(gateway.audit().entries().await[0].decision, AuditDecision::Rejected);
    }

    #[tokio::test]
    async fn test_open_breaker_denies_before_rules() {
        let gateway = gateway_with(Arc::new(InMemoryRuleStore::new())).await;
        gateway.breakers().initialize_breaker(
            "agent-1",
            Some(CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            }),
        );
        gateway.trip_breaker("agent-1", "manual halt").await.unwrap();

        let decision = gateway.evaluate_trade(&request(), None).await;
        assert!(!decision.approved);
        assert_eq!(decision.stage, GatewayStage::CircuitBreaker);
        assert_eq!(decision.breaker.status, CircuitBreakerStatus::Open);
        assert!(decision.supervisor.is_none());

        let entries = gateway.audit().entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, EventSource::Operator);
        assert_eq!(entries[1].source, EventSource::CircuitBreaker);
    }

    #[tokio::test]
    async fn test_update_rule_recorded_as_pending() {
        let gateway = gateway_with(Arc::new(InMemoryRuleStore::new())).await;
        let outcome = gateway.update_rule("min-liquidity", &RulePatch::enable(false)).await.unwrap();

        assert_eq!(outcome.result.version, 2);
        assert!(outcome.audit.is_recorded());
        let entries = gateway.audit().entries().await;
        assert_eq!(entries[0].decision, AuditDecision::Pending);
        assert_eq!(entries[0].source, EventSource::Operator);

        // not yet effective: low liquidity is still blocked
        let low_liquidity = TradeRequest {
            token_liquidity: 10_000.0,
            ..request()
        };
        let decision = gateway.evaluate_trade(&low_liquidity, None).await;
        assert!(!decision.approved);
        assert!(decision.supervisor.unwrap().has_violation(RuleType::MinLiquidity));
    }

    #[tokio::test]
    async fn test_operator_actions_report_audit_failure() {
        let sink = Arc::new(MockAuditSink::new());
        let gateway = SafetyGateway::from_config(
            &Config::default(),
            Arc::new(InMemoryRuleStore::new()),
            Arc::new(MockSimulation::new()),
            Arc::new(AuditTrail::new().with_sink(sink.clone())),
        );
        gateway.rules().bootstrap(default_rules()).await.unwrap();
        gateway.breakers().initialize_breaker("agent-1", None);
        sink.set_failing(true);

        let update = gateway.update_rule("min-liquidity", &RulePatch::enable(false)).await.unwrap();
        assert_eq!(update.result.version, 2);
        assert!(matches!(update.audit, AuditWrite::Failed { .. }));

        let trip = gateway.trip_breaker("agent-1", "manual halt").await.unwrap();
        assert_eq!(trip.result.failure_count, 1);
        assert!(matches!(trip.audit, AuditWrite::Failed { .. }));

        let reset = gateway.reset_breaker("agent-1").await.unwrap();
        assert_eq!(reset.result.status, CircuitBreakerStatus::Closed);
        assert!(matches!(reset.audit, AuditWrite::Failed { .. }));

        assert!(gateway.audit().is_empty().await);
        sink.set_failing(false);
        let reset = gateway.reset_breaker("agent-1").await.unwrap();
        assert!(reset.audit.is_recorded());
        assert_eq!(gateway.audit().len().await, 1);
    }

    #[tokio::test]
    async fn test_sign_requires_custody() {
        let gateway = gateway_with(Arc::new(InMemoryRuleStore::new())).await;
        let req = PreflightRequest {
            agent_id: "agent-1".to_string(),
            transaction: "AQAB".to_string(),
            wallet_address: "W1".to_string(),
            expected_balance_change: -1.0,
            action: TradeAction::Buy,
            token_address: None,
        };
        let result = gateway.sign_after_preflight(&req).await;
        assert!(matches!(result, Err(GatewayError::CustodyNotConfigured)));
    }
}
