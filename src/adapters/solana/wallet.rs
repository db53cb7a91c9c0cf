use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::codec::{decode_transaction, encode_transaction};
use crate::ports::custody::{CustodyError, KeyCustodyPort};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Failed to load keypair from file: {0}")]
    LoadError(String),
    #[error("Invalid keypair bytes: {0}")]
    InvalidKeypair(String),
}

/// Local keypair custody: loads a Solana keypair file and signs with it
pub struct WalletManager {
    keypair: Keypair,
}

impl WalletManager {
    /// Load keypair from a file path (JSON array format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| WalletError::LoadError(format!("Failed to read file: {}", e)))?;

        // Parse JSON array of bytes
        let bytes: Vec<u8> = serde_json::from_str(&contents)
            .map_err(|e| WalletError::LoadError(format!("Invalid JSON format: {}", e)))?;

        Self::from_bytes(&bytes)
    }

    /// Load keypair from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let keypair = Keypair::try_from(bytes)
            .map_err(|e| WalletError::InvalidKeypair(e.to_string()))?;

        Ok(Self { keypair })
    }

    /// Create a new random keypair (for testing)
    pub fn new_random() -> Self {
        Self {
            keypair: Keypair::new(),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Re-sign the transaction's message with this keypair.
    ///
    /// Fails unless this wallet is the transaction's only required signer.
    pub fn sign_versioned(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, CustodyError> {
        VersionedTransaction::try_new(tx.message, &[&self.keypair])
            .map_err(|e| CustodyError::SigningFailed(e.to_string()))
    }
}

#[async_trait]
impl KeyCustodyPort for WalletManager {
    fn public_key(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    async fn sign_transaction(&self, transaction: &str) -> Result<String, CustodyError> {
        let tx = decode_transaction(transaction)
            .map_err(|e| CustodyError::InvalidTransaction(e.to_string()))?;
        let signed = self.sign_versioned(tx)?;
        encode_transaction(&signed).map_err(|e| CustodyError::SigningFailed(e.to_string()))
    }
}
