use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),
    #[error("Simulation RPC failed: {0}")]
    Rpc(String),
}

/// What a non-committing simulation endpoint reports for one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSimulation {
    /// Wallet balance before the transaction (lamports)
    pub pre_balance: u64,
    /// Wallet balance after the simulated transaction (lamports)
    pub post_balance: u64,
    pub logs: Vec<String>,
    /// Execution error reported by the runtime, if the transaction failed
    pub error: Option<String>,
}

impl RawSimulation {
    pub fn new(pre_balance: u64, post_balance: u64, logs: Vec<String>) -> Self {
        Self {
            pre_balance,
            post_balance,
            logs,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Dry-runs an encoded transaction for a wallet without committing it
#[async_trait]
pub trait SimulationPort: Send + Sync {
    async fn simulate(
        &self,
        transaction: &str,
        wallet_address: &str,
    ) -> Result<RawSimulation, SimulationError>;
}
