use async_trait::async_trait;
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSimulateTransactionAccountsConfig, RpcSimulateTransactionConfig};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::codec::decode_transaction;
use crate::ports::simulation::{RawSimulation, SimulationError, SimulationPort};

#[derive(Debug, Error)]
pub enum SolanaClientError {
    #[error("RPC request failed: {0}")]
    RpcError(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid commitment level: {0}")]
    InvalidCommitment(String),
}

impl From<SolanaClientError> for SimulationError {
    fn from(e: SolanaClientError) -> Self {
        match e {
            SolanaClientError::InvalidPublicKey(msg) => SimulationError::InvalidAddress(msg),
            other => SimulationError::Rpc(other.to_string()),
        }
    }
}

/// Wrapper around Solana RPC client with async-compatible methods
#[derive(Clone)]
pub struct SolanaClient {
    client: Arc<RpcClient>,
}

impl SolanaClient {
    /// Create a new Solana RPC client
    pub fn new(rpc_url: String) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()));
        Self { client }
    }

    /// Client whose HTTP requests give up after `timeout`
    pub fn with_timeout(rpc_url: String, commitment: &str, timeout: Duration) -> Result<Self, SolanaClientError> {
        let commitment = CommitmentConfig::from_str(commitment)
            .map_err(|_| SolanaClientError::InvalidCommitment(commitment.to_string()))?;
        let client = Arc::new(RpcClient::new_with_timeout_and_commitment(rpc_url, timeout, commitment));
        Ok(Self { client })
    }

    /// Get SOL balance for a public key
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64, SolanaClientError> {
        let pubkey = Pubkey::from_str(pubkey)
            .map_err(|e| SolanaClientError::InvalidPublicKey(e.to_string()))?;

        // Spawn blocking to make sync RPC call async-compatible
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .get_balance(&pubkey)
                .map_err(|e| SolanaClientError::RpcError(e.to_string()))
        })
        .await
        .map_err(|e| SolanaClientError::RpcError(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl SimulationPort for SolanaClient {
    /// Simulate without committing: signatures are not verified and the
    /// blockhash is replaced, so unsigned or stale transactions still run.
    /// The wallet's post-simulation account is requested alongside.
    async fn simulate(
        &self,
        transaction: &str,
        wallet_address: &str,
    ) -> Result<RawSimulation, SimulationError> {
        let tx = decode_transaction(transaction)
            .map_err(|e| SimulationError::InvalidTransaction(e.to_string()))?;
        let wallet = Pubkey::from_str(wallet_address)
            .map_err(|e| SimulationError::InvalidAddress(e.to_string()))?;

        let pre_balance = self.get_balance(wallet_address).await?;

        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            accounts: Some(RpcSimulateTransactionAccountsConfig {
                encoding: None,
                addresses: vec![wallet.to_string()],
            }),
            ..Default::default()
        };

        let client = Arc::clone(&self.client);
        let response = tokio::task::spawn_blocking(move || {
            client
                .simulate_transaction_with_config(&tx, config)
                .map_err(|e| SimulationError::Rpc(e.to_string()))
        })
        .await
        .map_err(|e| SimulationError::Rpc(format!("Task join error: {}", e)))??;

        let value = response.value;
        // A missing account means the wallet was closed or drained
        let post_balance = value
            .accounts
            .as_ref()
            .and_then(|accounts| accounts.first())
            .and_then(|account| account.as_ref())
            .map(|account| account.lamports)
            .unwrap_or(0);

        Ok(RawSimulation {
            pre_balance,
            post_balance,
            logs: value.logs.unwrap_or_default(),
            error: value.err.map(|e| e.to_string()),
        })
    }
}
