use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CustodyError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Contract a wallet custody provider must satisfy.
///
/// How keys are stored and which signature scheme is used are left to the
/// provider.
#[async_trait]
pub trait KeyCustodyPort: Send + Sync {
    /// Address of the wallet this provider signs for
    fn public_key(&self) -> String;

    /// Sign an encoded transaction, returning the signed transaction
    /// base64-encoded
    async fn sign_transaction(&self, transaction: &str) -> Result<String, CustodyError>;
}
