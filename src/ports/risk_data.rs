use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskDataError {
    #[error("Risk data provider unavailable: {0}")]
    Unavailable(String),
    #[error("No risk data for token: {0}")]
    UnknownToken(String),
}

/// Market and contract risk inputs for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskData {
    /// 0-100, absent when the provider could not score the token
    pub trust_score: Option<f64>,
    pub liquidity_usd: f64,
    pub market_cap_usd: f64,
}

/// Supplies per-token risk data to enrich trade requests
#[async_trait]
pub trait RiskDataPort: Send + Sync {
    async fn risk_data(&self, token_address: &str) -> Result<RiskData, RiskDataError>;
}
