//! Supervisor Rules
//!
//! Typed policy units evaluated by the rule engine. Each rule's parameters
//! are a tagged variant, so a rule's type and the shape of its parameters
//! can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::trade::TradeRequest;

/// Default maximum position size as percent of portfolio
pub const DEFAULT_MAX_POSITION_PERCENT: f64 = 10.0;

/// Default minimum pool liquidity in USD
pub const DEFAULT_MIN_LIQUIDITY_USD: f64 = 50_000.0;

/// Default maximum trades per agent per day
pub const DEFAULT_MAX_DAILY_TRADES: u32 = 50;

/// Default loss percent above which a warning is attached
pub const DEFAULT_MAX_LOSS_PERCENT: f64 = 5.0;

/// Default minimum market cap in USD
pub const DEFAULT_MIN_MARKET_CAP_USD: f64 = 100_000.0;

/// Default maximum share of the portfolio in a single token
pub const DEFAULT_MAX_CONCENTRATION_PERCENT: f64 = 25.0;

/// Default minimum trust score (0-100)
pub const DEFAULT_MIN_TRUST_SCORE: f64 = 60.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Rule {rule_id} is {expected}, cannot apply {actual} params")]
    TypeMismatch {
        rule_id: String,
        expected: RuleType,
        actual: RuleType,
    },

    #[error("Invalid params for rule {rule_id}: {reason}")]
    InvalidParams { rule_id: String, reason: String },
}

/// Closed set of rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    MaxPositionSize,
    MinLiquidity,
    MaxDailyTrades,
    MaxLossPerTrade,
    RequiredMarketCap,
    MaxPortfolioConcentration,
    MinTrustScore,
    BlockedTokens,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::MaxPositionSize => "MAX_POSITION_SIZE",
            RuleType::MinLiquidity => "MIN_LIQUIDITY",
            RuleType::MaxDailyTrades => "MAX_DAILY_TRADES",
            RuleType::MaxLossPerTrade => "MAX_LOSS_PER_TRADE",
            RuleType::RequiredMarketCap => "REQUIRED_MARKET_CAP",
            RuleType::MaxPortfolioConcentration => "MAX_PORTFOLIO_CONCENTRATION",
            RuleType::MinTrustScore => "MIN_TRUST_SCORE",
            RuleType::BlockedTokens => "BLOCKED_TOKENS",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule parameters, tagged by rule type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleParams {
    MaxPositionSize { max_percent: f64 },
    MinLiquidity { min_usd: f64 },
    MaxDailyTrades { max_trades: u32 },
    MaxLossPerTrade { max_loss_percent: f64 },
    RequiredMarketCap { min_usd: f64 },
    MaxPortfolioConcentration { max_percent: f64 },
    MinTrustScore { min_score: f64 },
    BlockedTokens { tokens: Vec<String> },
}

impl RuleParams {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleParams::MaxPositionSize { .. } => RuleType::MaxPositionSize,
            RuleParams::MinLiquidity { .. } => RuleType::MinLiquidity,
            RuleParams::MaxDailyTrades { .. } => RuleType::MaxDailyTrades,
            RuleParams::MaxLossPerTrade { .. } => RuleType::MaxLossPerTrade,
            RuleParams::RequiredMarketCap { .. } => RuleType::RequiredMarketCap,
            RuleParams::MaxPortfolioConcentration { .. } => RuleType::MaxPortfolioConcentration,
            RuleParams::MinTrustScore { .. } => RuleType::MinTrustScore,
            RuleParams::BlockedTokens { .. } => RuleType::BlockedTokens,
        }
    }

    /// Rejects NaN thresholds, which would make every comparison pass
    pub fn validate(&self) -> Result<(), String> {
        let value = match self {
            RuleParams::MaxPositionSize { max_percent } => *max_percent,
            RuleParams::MinLiquidity { min_usd } => *min_usd,
            RuleParams::MaxDailyTrades { .. } => 0.0,
            RuleParams::MaxLossPerTrade { max_loss_percent } => *max_loss_percent,
            RuleParams::RequiredMarketCap { min_usd } => *min_usd,
            RuleParams::MaxPortfolioConcentration { max_percent } => *max_percent,
            RuleParams::MinTrustScore { min_score } => *min_score,
            RuleParams::BlockedTokens { .. } => 0.0,
        };
        if value.is_nan() {
            return Err(format!("{} threshold is NaN", self.rule_type()));
        }
        if value < 0.0 {
            return Err(format!("{} threshold must be >= 0, got {}", self.rule_type(), value));
        }
        Ok(())
    }
}

/// A named, independently toggleable policy unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorRule {
    /// Stable id, the only key used for updates
    pub id: String,
    pub enabled: bool,
    pub params: RuleParams,
    #[serde(default)]
    pub description: String,
}

impl SupervisorRule {
    pub fn new(id: impl Into<String>, params: RuleParams, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            params,
            description: description.into(),
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.params.rule_type()
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Apply a partial update, returning the patched copy
    pub fn patched(&self, patch: &RulePatch) -> Result<Self, RuleError> {
        let mut rule = self.clone();
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        if let Some(params) = &patch.params {
            if params.rule_type() != self.rule_type() {
                return Err(RuleError::TypeMismatch {
                    rule_id: self.id.clone(),
                    expected: self.rule_type(),
                    actual: params.rule_type(),
                });
            }
            params.validate().map_err(|reason| RuleError::InvalidParams {
                rule_id: self.id.clone(),
                reason,
            })?;
            rule.params = params.clone();
        }
        if let Some(description) = &patch.description {
            rule.description = description.clone();
        }
        Ok(rule)
    }
}

/// Partial update for a rule; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub params: Option<RuleParams>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RulePatch {
    pub fn enable(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn params(params: RuleParams) -> Self {
        Self {
            params: Some(params),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    /// Informational, never flips approval
    Warning,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub rule_type: RuleType,
    pub message: String,
    pub severity: ViolationSeverity,
}

impl RuleViolation {
    pub fn block(rule: &SupervisorRule, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_type: rule.rule_type(),
            message: message.into(),
            severity: ViolationSeverity::Block,
        }
    }

    pub fn warning(rule: &SupervisorRule, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_type: rule.rule_type(),
            message: message.into(),
            severity: ViolationSeverity::Warning,
        }
    }

    pub fn is_block(&self) -> bool {
        self.severity == ViolationSeverity::Block
    }
}

/// Outcome of evaluating one request against the active rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorDecision {
    pub approved: bool,
    pub violations: Vec<RuleViolation>,
    pub timestamp: DateTime<Utc>,
    pub request: TradeRequest,
}

impl SupervisorDecision {
    pub fn blocking_violations(&self) -> impl Iterator<Item = &RuleViolation> {
        self.violations.iter().filter(|v| v.is_block())
    }

    pub fn has_violation(&self, rule_type: RuleType) -> bool {
        self.violations.iter().any(|v| v.rule_type == rule_type)
    }

    /// One-line summary suitable for audit reasons
    pub fn summary(&self) -> String {
        if self.approved && self.violations.is_empty() {
            return "All rules passed".to_string();
        }
        let messages: Vec<&str> = if self.approved {
            self.violations.iter().map(|v| v.message.as_str()).collect()
        } else {
            self.blocking_violations().map(|v| v.message.as_str()).collect()
        };
        if self.approved {
            format!("Approved with warnings: {}", messages.join("; "))
        } else {
            format!("Rejected: {}", messages.join("; "))
        }
    }
}

/// The default rule set seeded for a fresh deployment
pub fn default_rules() -> Vec<SupervisorRule> {
    vec![
        SupervisorRule::new(
            "max-position-size",
            RuleParams::MaxPositionSize { max_percent: DEFAULT_MAX_POSITION_PERCENT },
            "Limit a single position to a share of the portfolio",
        ),
        SupervisorRule::new(
            "min-liquidity",
            RuleParams::MinLiquidity { min_usd: DEFAULT_MIN_LIQUIDITY_USD },
            "Only trade tokens with enough pool liquidity",
        ),
        SupervisorRule::new(
            "max-daily-trades",
            RuleParams::MaxDailyTrades { max_trades: DEFAULT_MAX_DAILY_TRADES },
            "Cap the number of trades per agent per day",
        ),
        SupervisorRule::new(
            "max-loss-per-trade",
            RuleParams::MaxLossPerTrade { max_loss_percent: DEFAULT_MAX_LOSS_PERCENT },
            "Warn when a trade risks a large share of the portfolio",
        ),
        SupervisorRule::new(
            "required-market-cap",
            RuleParams::RequiredMarketCap { min_usd: DEFAULT_MIN_MARKET_CAP_USD },
            "Only trade tokens above a minimum market cap",
        ),
        SupervisorRule::new(
            "max-portfolio-concentration",
            RuleParams::MaxPortfolioConcentration { max_percent: DEFAULT_MAX_CONCENTRATION_PERCENT },
            "Limit total exposure to a single token",
        ),
        SupervisorRule::new(
            "min-trust-score",
            RuleParams::MinTrustScore { min_score: DEFAULT_MIN_TRUST_SCORE },
            "Require a minimum token trust score",
        ),
        SupervisorRule::new(
            "blocked-tokens",
            RuleParams::BlockedTokens { tokens: Vec::new() },
            "Never trade explicitly blocked tokens",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_determine_type() {
        let rule = SupervisorRule::new("r", RuleParams::MinLiquidity { min_usd: 1.0 }, "");
        assert_eq!(rule.rule_type(), RuleType::MinLiquidity);
        assert_eq!(rule.rule_type().to_string(), "MIN_LIQUIDITY");
    }

    #[test]
    fn test_params_tagged_serde() {
        let params = RuleParams::MaxPositionSize { max_percent: 12.5 };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["type"], "MAX_POSITION_SIZE");
        assert_eq!(json["max_percent"], 12.5);

        let parsed: RuleParams =
            serde_json::from_str(r#"{"type":"BLOCKED_TOKENS","tokens":["SCAM"]}"#).unwrap();
        assert_eq!(parsed, RuleParams::BlockedTokens { tokens: vec!["SCAM".to_string()] });
    }

    #[test]
    fn test_params_wrong_shape_rejected() {
        let parsed: Result<RuleParams, _> =
            serde_json::from_str(r#"{"type":"MAX_POSITION_SIZE","min_usd":5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_patch_enabled_and_description() {
        let rule = SupervisorRule::new("r", RuleParams::MinTrustScore { min_score: 60.0 }, "old");
        let patch = RulePatch {
            enabled: Some(false),
            description: Some("new".to_string()),
            ..RulePatch::default()
        };
        let patched = rule.patched(&patch).unwrap();
        assert!(!patched.enabled);
        assert_eq!(patched.description, "new");
        assert_eq!(patched.params, rule.params);
    }

    #[test]
    fn test_patch_type_mismatch() {
        let rule = SupervisorRule::new("r", RuleParams::MinTrustScore { min_score: 60.0 }, "");
        let patch = RulePatch::params(RuleParams::MinLiquidity { min_usd: 10.0 });
        let err = rule.patched(&patch).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    #[test]
    fn test_patch_rejects_nan() {
        let rule = SupervisorRule::new("r", RuleParams::MaxPositionSize { max_percent: 10.0 }, "");
        let patch = RulePatch::params(RuleParams::MaxPositionSize { max_percent: f64::NAN });
        assert!(matches!(rule.patched(&patch), Err(RuleError::InvalidParams { .. })));
    }

    #[test]
    fn test_default_rules_cover_every_type() {
        let rules = default_rules();
        assert_eq!(rules.len(), 8);
        assert!(rules.iter().all(|r| r.enabled));
        for rule_type in [
            RuleType::MaxPositionSize,
            RuleType::MinLiquidity,
            RuleType::MaxDailyTrades,
            RuleType::MaxLossPerTrade,
            RuleType::RequiredMarketCap,
            RuleType::MaxPortfolioConcentration,
            RuleType::MinTrustScore,
            RuleType::BlockedTokens,
        ] {
            assert!(rules.iter().any(|r| r.rule_type() == rule_type));
        }
    }
}
