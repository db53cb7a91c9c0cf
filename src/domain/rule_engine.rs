//! Rule Engine
//!
//! Evaluates a trade request against every enabled supervisor rule.
//! Checkers are pure functions of `(rule, request)`; a rule whose params fail
//! validation is skipped with a warning so one bad definition cannot disable
//! the remaining checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::{
    default_rules, RuleError, RuleParams, RulePatch, RuleViolation, SupervisorDecision,
    SupervisorRule,
};
use super::trade::{percent_of_portfolio, TradeRequest};

/// In-memory rule set with direct (non-versioned) updates.
///
/// The versioned, delayed-activation path lives in `RuleVersionStore`; this
/// engine is what it builds for a single evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEngine {
    rules: Vec<SupervisorRule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RuleEngine {
    pub fn new(rules: Vec<SupervisorRule>) -> Self {
        Self { rules }
    }

    /// Evaluate a request at the current time
    pub fn evaluate(&self, request: &TradeRequest) -> SupervisorDecision {
        self.evaluate_at(request, Utc::now())
    }

    /// Evaluate a request, stamping the decision with `now`.
    ///
    /// Violations keep rule iteration order. The request is approved iff no
    /// violation has block severity.
    pub fn evaluate_at(&self, request: &TradeRequest, now: DateTime<Utc>) -> SupervisorDecision {
        let mut violations = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if let Err(reason) = rule.params.validate() {
                tracing::warn!("Skipping rule {} with invalid params: {}", rule.id, reason);
                continue;
            }
            if let Some(violation) = check_rule(rule, request) {
                tracing::debug!(
                    "Rule {} ({}) {:?}: {}",
                    rule.id,
                    rule.rule_type(),
                    violation.severity,
                    violation.message
                );
                violations.push(violation);
            }
        }

        let approved = !violations.iter().any(|v| v.is_block());
        if approved {
            tracing::debug!(
                "Trade approved for agent {} ({} {} SOL of {})",
                request.agent_id,
                request.action,
                request.amount_sol,
                request.token_symbol
            );
        } else {
            tracing::warn!(
                "Trade rejected for agent {}: {} blocking violation(s)",
                request.agent_id,
                violations.iter().filter(|v| v.is_block()).count()
            );
        }

        SupervisorDecision {
            approved,
            violations,
            timestamp: now,
            request: request.clone(),
        }
    }

    /// Replace the listed fields of a rule in place
    pub fn update_rule(&mut self, rule_id: &str, patch: &RulePatch) -> Result<SupervisorRule, RuleError> {
        let slot = self
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;
        let updated = slot.patched(patch)?;
        *slot = updated.clone();
        tracing::info!("Rule {} updated in place (enabled: {})", rule_id, updated.enabled);
        Ok(updated)
    }

    pub fn get_rules(&self) -> &[SupervisorRule] {
        &self.rules
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<&SupervisorRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}

/// Dispatch a single rule to its checker
pub fn check_rule(rule: &SupervisorRule, request: &TradeRequest) -> Option<RuleViolation> {
    match &rule.params {
        RuleParams::MaxPositionSize { max_percent } => check_position_size(rule, request, *max_percent),
        RuleParams::MinLiquidity { min_usd } => check_liquidity(rule, request, *min_usd),
        RuleParams::MaxDailyTrades { max_trades } => check_daily_trades(rule, request, *max_trades),
        RuleParams::MaxLossPerTrade { max_loss_percent } => {
            check_loss_per_trade(rule, request, *max_loss_percent)
        }
        RuleParams::RequiredMarketCap { min_usd } => check_market_cap(rule, request, *min_usd),
        RuleParams::MaxPortfolioConcentration { max_percent } => {
            check_concentration(rule, request, *max_percent)
        }
        RuleParams::MinTrustScore { min_score } => check_trust_score(rule, request, *min_score),
        RuleParams::BlockedTokens { tokens } => check_blocked_tokens(rule, request, tokens),
    }
}

// Comparisons are negated so NaN inputs fail the check.
fn check_position_size(rule: &SupervisorRule, request: &TradeRequest, max_percent: f64) -> Option<RuleViolation> {
    let percent = request.position_percent();
    if !(percent <= max_percent) {
        return Some(RuleViolation::block(
            rule,
            format!(
                "Position size {:.2}% of portfolio exceeds maximum {:.2}%",
                percent, max_percent
            ),
        ));
    }
    None
}

fn check_liquidity(rule: &SupervisorRule, request: &TradeRequest, min_usd: f64) -> Option<RuleViolation> {
    if !(request.token_liquidity >= min_usd) {
        return Some(RuleViolation::block(
            rule,
            format!(
                "Token liquidity ${:.0} below minimum ${:.0}",
                request.token_liquidity, min_usd
            ),
        ));
    }
    None
}

// `>=`: once the counter reaches the limit the next trade is blocked.
fn check_daily_trades(rule: &SupervisorRule, request: &TradeRequest, max_trades: u32) -> Option<RuleViolation> {
    if request.daily_trade_count >= max_trades {
        return Some(RuleViolation::block(
            rule,
            format!(
                "Daily trade count {} reached maximum {}",
                request.daily_trade_count, max_trades
            ),
        ));
    }
    None
}

// Worst case: the whole position goes to zero.
fn check_loss_per_trade(rule: &SupervisorRule, request: &TradeRequest, max_loss_percent: f64) -> Option<RuleViolation> {
    let potential_loss = request.position_percent();
    if !(potential_loss <= max_loss_percent) {
        return Some(RuleViolation::warning(
            rule,
            format!(
                "Potential loss {:.2}% of portfolio exceeds {:.2}%",
                potential_loss, max_loss_percent
            ),
        ));
    }
    None
}

fn check_market_cap(rule: &SupervisorRule, request: &TradeRequest, min_usd: f64) -> Option<RuleViolation> {
    if !(request.token_market_cap >= min_usd) {
        return Some(RuleViolation::block(
            rule,
            format!(
                "Token market cap ${:.0} below required ${:.0}",
                request.token_market_cap, min_usd
            ),
        ));
    }
    None
}

fn check_concentration(rule: &SupervisorRule, request: &TradeRequest, max_percent: f64) -> Option<RuleViolation> {
    request.current_holdings.as_ref()?;

    let total = request.existing_holding() + request.amount_sol;
    let percent = percent_of_portfolio(total, request.portfolio_value_sol);
    if !(percent <= max_percent) {
        return Some(RuleViolation::block(
            rule,
            format!(
                "Concentration in {} would be {:.2}% of portfolio, maximum {:.2}%",
                request.token_symbol, percent, max_percent
            ),
        ));
    }
    None
}

fn check_trust_score(rule: &SupervisorRule, request: &TradeRequest, min_score: f64) -> Option<RuleViolation> {
    match request.trust_score {
        None => Some(RuleViolation::block(
            rule,
            format!("Trust score unavailable for {}, minimum {:.0} required", request.token_symbol, min_score),
        )),
        Some(score) if score.is_nan() || score < min_score => Some(RuleViolation::block(
            rule,
            format!("Trust score {:.0} below minimum {:.0}", score, min_score),
        )),
        Some(_) => None,
    }
}

fn check_blocked_tokens(rule: &SupervisorRule, request: &TradeRequest, tokens: &[String]) -> Option<RuleViolation> {
    let blocked = tokens.iter().any(|t| {
        *t == request.token_address || t.eq_ignore_ascii_case(&request.token_symbol)
    });
    if blocked {
        return Some(RuleViolation::block(
            rule,
            format!("Token {} ({}) is blocked", request.token_symbol, request.token_address),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::{RuleType, ViolationSeverity};
    use crate::domain::trade::TradeAction;
    use std::collections::HashMap;

    fn base_request() -> TradeRequest {
        TradeRequest {
            agent_id: "agent-1".to_string(),
            action: TradeAction::Buy,
            token_address: "BONKmint".to_string(),
            token_symbol: "BONK".to_string(),
            amount_sol: 1.0,
            portfolio_value_sol: 100.0,
            token_liquidity: 1_000_000.0,
            token_market_cap: 5_000_000.0,
            daily_trade_count: 5,
            trust_score: Some(80.0),
            current_holdings: None,
        }
    }

    fn engine_with(params: RuleParams) -> RuleEngine {
        RuleEngine::new(vec![SupervisorRule::new("rule", params, "")])
    }

    #[test]
    fn test_default_rules_approve_clean_request() {
        let decision = RuleEngine::default().evaluate(&base_request());
        assert!(decision.approved);
        assert!(decision.violations.is_empty());
    }

    #[test]
    fn test_oversized_position_rejected() {
        let mut req = base_request();
        req.amount_sol = 50.0;
        let decision = RuleEngine::default().evaluate(&req);
        assert!(!decision.approved);
        assert!(decision.has_violation(RuleType::MaxPositionSize));
    }

    #[test]
    fn test_low_liquidity_only_violation() {
        let mut req = base_request();
        req.token_liquidity = 10_000.0;
        let decision = RuleEngine::default().evaluate(&req);
        assert!(!decision.approved);
        assert_eq!(decision.violations.len(), 1);
        assert_eq!(decision.violations[0].rule_type, RuleType::MinLiquidity);
    }

    #[test]
    fn test_position_size_threshold_is_exclusive() {
        let engine = engine_with(RuleParams::MaxPositionSize { max_percent: 10.0 });
        let mut req = base_request();
        req.amount_sol = 10.0;
        assert!(engine.evaluate(&req).approved);

        req.amount_sol = 10.01;
        assert!(!engine.evaluate(&req).approved);
    }

    #[test]
    fn test_daily_trades_blocks_at_limit() {
        let engine = engine_with(RuleParams::MaxDailyTrades { max_trades: 10 });
        let mut req = base_request();
        req.daily_trade_count = 9;
        assert!(engine.evaluate(&req).approved);

        req.daily_trade_count = 10;
        assert!(!engine.evaluate(&req).approved);
    }

    #[test]
    fn test_loss_per_trade_is_warning_only() {
        let engine = engine_with(RuleParams::MaxLossPerTrade { max_loss_percent: 5.0 });
        let mut req = base_request();
        req.amount_sol = 20.0;
        let decision = engine.evaluate(&req);
        assert!(decision.approved);
        assert_eq!(decision.violations.len(), 1);
        assert_eq!(decision.violations[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_market_cap() {
        let engine = engine_with(RuleParams::RequiredMarketCap { min_usd: 1_000_000.0 });
        let mut req = base_request();
        req.token_market_cap = 999_999.0;
        assert!(!engine.evaluate(&req).approved);
    }

    #[test]
    fn test_concentration_requires_holdings() {
        let engine = engine_with(RuleParams::MaxPortfolioConcentration { max_percent: 20.0 });
        let mut req = base_request();
        req.amount_sol = 5.0;
        assert!(engine.evaluate(&req).approved);

        let mut holdings = HashMap::new();
        holdings.insert("BONKmint".to_string(), 18.0);
        let req = req.with_holdings(holdings);
        let decision = engine.evaluate(&req);
        assert!(!decision.approved);
        assert!(decision.violations[0].message.contains("23.00%"));
    }

    #[test]
    fn test_missing_trust_score_fails_closed() {
        let engine = engine_with(RuleParams::MinTrustScore { min_score: 0.0 });
        let req = base_request().with_trust_score(None);
        let decision = engine.evaluate(&req);
        assert!(!decision.approved);
        assert_eq!(decision.violations[0].rule_type, RuleType::MinTrustScore);
    }

    #[test]
    fn test_low_trust_score() {
        let engine = engine_with(RuleParams::MinTrustScore { min_score: 60.0 });
        assert!(!engine.evaluate(&base_request().with_trust_score(Some(59.9))).approved);
        assert!(engine.evaluate(&base_request().with_trust_score(Some(60.0))).approved);
    }

    #[test]
    fn test_blocked_tokens_by_symbol_or_address() {
        let engine = engine_with(RuleParams::BlockedTokens {
            tokens: vec!["bonk".to_string()],
        });
        assert!(!engine.evaluate(&base_request()).approved);

        let engine = engine_with(RuleParams::BlockedTokens {
            tokens: vec!["BONKmint".to_string()],
        });
        assert!(!engine.evaluate(&base_request()).approved);

        let engine = engine_with(RuleParams::BlockedTokens {
            tokens: vec!["WIF".to_string()],
        });
        assert!(engine.evaluate(&base_request()).approved);
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let engine = RuleEngine::new(vec![SupervisorRule::new(
            "pos",
            RuleParams::MaxPositionSize { max_percent: 1.0 },
            "",
        )
        .disabled()]);
        let mut req = base_request();
        req.amount_sol = 90.0;
        assert!(engine.evaluate(&req).approved);
    }

    #[test]
    fn test_invalid_params_rule_is_noop() {
        let engine = RuleEngine::new(vec![
            SupervisorRule::new("broken", RuleParams::MinLiquidity { min_usd: f64::NAN }, ""),
            SupervisorRule::new("trust", RuleParams::MinTrustScore { min_score: 50.0 }, ""),
        ]);
        let decision = engine.evaluate(&base_request().with_trust_score(None));
        assert!(!decision.approved);
        assert_eq!(decision.violations.len(), 1);
        assert_eq!(decision.violations[0].rule_id, "trust");
    }

    #[test]
    fn test_violations_keep_rule_order() {
        let mut req = base_request();
        req.amount_sol = 50.0;
        req.token_liquidity = 10.0;
        req.trust_score = None;
        let decision = RuleEngine::default().evaluate(&req);
        let ids: Vec<&str> = decision.violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["max-position-size", "min-liquidity", "max-loss-per-trade", "min-trust-score"]
        );
    }

    #[test]
    fn test_nan_inputs_fail_closed() {
        let engine = RuleEngine::default();

        let mut req = base_request();
        req.token_liquidity = f64::NAN;
        let decision = engine.evaluate(&req);
        assert!(!decision.approved);
        assert!(decision.has_violation(RuleType::MinLiquidity));

        let mut req = base_request();
        req.token_market_cap = f64::NAN;
        let decision = engine_with(RuleParams::RequiredMarketCap { min_usd: 1_000.0 }).evaluate(&req);
        assert!(!decision.approved);
        assert!(decision.has_violation(RuleType::RequiredMarketCap));

        let mut req = base_request();
        req.amount_sol = f64::NAN;
        let decision = engine.evaluate(&req);
        assert!(!decision.approved);
        assert!(decision.has_violation(RuleType::MaxPositionSize));
        assert!(decision.has_violation(RuleType::MaxLossPerTrade));

        let mut req = base_request();
        req.amount_sol = f64::NAN;
        req.current_holdings = Some(HashMap::new());
        let decision = engine_with(RuleParams::MaxPortfolioConcentration { max_percent: 50.0 }).evaluate(&req);
        assert!(!decision.approved);
    }

    #[test]
    fn test_zero_portfolio_blocks_position() {
        let engine = engine_with(RuleParams::MaxPositionSize { max_percent: 100.0 });
        let mut req = base_request();
        req.portfolio_value_sol = 0.0;
        assert!(!engine.evaluate(&req).approved);
    }

    #[test]
    fn test_update_rule_in_place() {
        let mut engine = RuleEngine::default();
        let updated = engine
            .update_rule(
                "max-position-size",
                &RulePatch::params(RuleParams::MaxPositionSize { max_percent: 60.0 }),
            )
            .unwrap();
        assert_eq!(updated.params, RuleParams::MaxPositionSize { max_percent: 60.0 });

        let mut req = base_request();
        req.amount_sol = 50.0;
        let decision = engine.evaluate(&req);
        assert!(!decision.has_violation(RuleType::MaxPositionSize));
    }

    #[test]
    fn test_update_unknown_rule() {
        let mut engine = RuleEngine::default();
        let err = engine.update_rule("nope", &RulePatch::enable(false)).unwrap_err();
        assert_eq!(err, RuleError::NotFound("nope".to_string()));
    }

    #[test]
    fn test_decision_summary() {
        let mut req = base_request();
        req.amount_sol = 50.0;
        let decision = RuleEngine::default().evaluate(&req);
        assert!(decision.summary().starts_with("Rejected:"));
        assert!(RuleEngine::default().evaluate(&base_request()).summary().contains("passed"));
    }
}
