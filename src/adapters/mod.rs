//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Solana: RPC simulation client, transaction codec and keypair custody
//! - Anchor: HTTP anchoring client for audit entries
//! - Audit file: JSONL audit persistence
//! - Rule store: in-memory versioned rule store
//! - CLI: Command-line interface definitions

pub mod solana;
pub mod anchor;
pub mod audit_file;
pub mod rule_store;
pub mod cli;

pub use solana::{SolanaClient, WalletManager};
pub use anchor::HttpAnchor;
pub use audit_file::{load_trail, JsonlAuditSink};
pub use rule_store::InMemoryRuleStore;
pub use cli::CliApp;
