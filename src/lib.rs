//! Butters Gateway - trade safety checks for autonomous Solana trading agents
//!
//! Every trade an agent proposes passes a per-agent circuit breaker and a
//! versioned rule set; every transaction it wants signed is simulated first.
//! All decisions land in a hash-chained audit trail.
//!
//! # Modules
//!
//! - `domain`: Rules, rule versions, circuit breakers, simulation analysis, preflight, audit trail
//! - `ports`: Trait abstractions (RuleStore, SimulationPort, AnchorPort, AuditSink, RiskDataPort, KeyCustodyPort)
//! - `adapters`: External implementations (Solana RPC, wallet, HTTP anchor, JSONL audit file, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: The `SafetyGateway` composing the components

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
