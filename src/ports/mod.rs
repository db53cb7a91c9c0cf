//! Ports Layer - Trait definitions for external collaborators
//!
//! The safety core never talks to the outside world directly. Each
//! collaborator sits behind one of these traits:
//! - Rule persistence (versioned rule history)
//! - Token risk data (trust score, liquidity, market cap)
//! - Transaction simulation RPC
//! - Audit anchoring and audit persistence
//! - Wallet key custody

pub mod rule_store;
pub mod risk_data;
pub mod simulation;
pub mod anchor;
pub mod audit_sink;
pub mod custody;
pub mod mocks;

pub use rule_store::{RuleStore, RuleStoreError};
pub use risk_data::{RiskData, RiskDataError, RiskDataPort};
pub use simulation::{RawSimulation, SimulationError, SimulationPort};
pub use anchor::{AnchorError, AnchorPort};
pub use audit_sink::{AuditSink, AuditSinkError};
pub use custody::{CustodyError, KeyCustodyPort};
