//! Wire transaction encoding
//!
//! Agents submit serialized transactions either base64 (what RPC nodes
//! expect) or base58 (what most wallets display). Both decode with bincode
//! into a `VersionedTransaction`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Transaction is neither valid base64 nor base58")]
    UnknownEncoding,
    #[error("Failed to deserialize transaction: {0}")]
    Deserialize(String),
    #[error("Failed to serialize transaction: {0}")]
    Serialize(String),
}

/// Decode a base64 or base58 wire transaction.
///
/// Base64 is tried first; base58 text that happens to be valid base64 will
/// fail to deserialize and fall through to base58.
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction, CodecError> {
    let encoded = encoded.trim();
    let mut last_error = CodecError::UnknownEncoding;

    if let Ok(bytes) = STANDARD.decode(encoded) {
        match bincode::deserialize::<VersionedTransaction>(&bytes) {
            Ok(tx) => return Ok(tx),
            Err(e) => last_error = CodecError::Deserialize(e.to_string()),
        }
    }
    if let Ok(bytes) = bs58::decode(encoded).into_vec() {
        match bincode::deserialize::<VersionedTransaction>(&bytes) {
            Ok(tx) => return Ok(tx),
            Err(e) => last_error = CodecError::Deserialize(e.to_string()),
        }
    }
    Err(last_error)
}

/// Serialize and base64-encode a transaction
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, CodecError> {
    let bytes = bincode::serialize(tx).map_err(|e| CodecError::Serialize(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        message::Message,
        pubkey::Pubkey,
        signature::{Keypair, Signer},
        system_instruction,
        transaction::Transaction,
    };

    fn transfer() -> VersionedTransaction {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1_000);
        let message = Message::new(&[ix], Some(&payer.pubkey()));
        VersionedTransaction::from(Transaction::new(&[&payer], message, Hash::default()))
    }

    #[test]
    fn test_decode_base64_and_base58() {
        let tx = transfer();
        let bytes = bincode::serialize(&tx).unwrap();

        let from_b64 = decode_transaction(&STANDARD.encode(&bytes)).unwrap();
        let from_b58 = decode_transaction(&bs58::encode(&bytes).into_string()).unwrap();
        assert_eq!(from_b64, tx);
        assert_eq!(from_b58, tx);
        assert_eq!(decode_transaction(&encode_transaction(&tx).unwrap()).unwrap(), tx);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_transaction("not a transaction!").is_err());
        assert!(decode_transaction("AQAB").is_err());
    }
}
