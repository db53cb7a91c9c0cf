use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Direction of a proposed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

/// A prospective trade submitted by an agent for approval.
///
/// Built once per request by the caller and never mutated afterwards; it is
/// embedded by value into decisions and audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub agent_id: String,
    pub action: TradeAction,
    pub token_address: String,
    pub token_symbol: String,
    /// Position size in SOL
    pub amount_sol: f64,
    pub portfolio_value_sol: f64,
    /// Pool liquidity in USD
    pub token_liquidity: f64,
    /// Market cap in USD
    pub token_market_cap: f64,
    pub daily_trade_count: u32,
    /// 0-100, `None` means unknown and always fails the trust check
    #[serde(default)]
    pub trust_score: Option<f64>,
    /// Token address -> current holding value in SOL
    #[serde(default)]
    pub current_holdings: Option<HashMap<String, f64>>,
}

impl TradeRequest {
    /// Position size as a percentage of the portfolio.
    ///
    /// An empty or negative portfolio yields infinity so every percentage
    /// limit fails closed.
    pub fn position_percent(&self) -> f64 {
        percent_of_portfolio(self.amount_sol, self.portfolio_value_sol)
    }

    /// Value already held in this token, zero when unknown
    pub fn existing_holding(&self) -> f64 {
        self.current_holdings
            .as_ref()
            .and_then(|h| h.get(&self.token_address))
            .copied()
            .unwrap_or(0.0)
    }

    /// Builder-style override used when risk data arrives after construction
    pub fn with_trust_score(mut self, trust_score: Option<f64>) -> Self {
        self.trust_score = trust_score;
        self
    }

    pub fn with_holdings(mut self, holdings: HashMap<String, f64>) -> Self {
        self.current_holdings = Some(holdings);
        self
    }
}

/// `amount / portfolio * 100`, infinite for an empty portfolio
pub(crate) fn percent_of_portfolio(amount: f64, portfolio: f64) -> f64 {
    if portfolio <= 0.0 || portfolio.is_nan() {
        return f64::INFINITY;
    }
    amount / portfolio * 100.0
}
