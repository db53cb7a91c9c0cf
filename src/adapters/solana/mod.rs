pub mod codec;
pub mod rpc;
pub mod wallet;

pub use codec::{decode_transaction, encode_transaction, CodecError};
pub use rpc::{SolanaClient, SolanaClientError};
pub use wallet::{WalletError, WalletManager};
