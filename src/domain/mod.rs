//! Domain Layer - Core safety logic for the trade gateway
//!
//! Pure decision logic; every external interaction goes through the ports
//! layer.
//!
//! - `trade`: Trade requests submitted by agents
//! - `rules` / `rule_engine`: Typed policy rules and their evaluation
//! - `rule_versions`: Versioned rules with delayed activation
//! - `circuit_breaker`: Per-agent trip/pause state machine
//! - `known_programs`: Known Solana programs and the malicious-program denylist
//! - `simulation`: Transaction dry-run risk classification
//! - `preflight`: Simulation-backed approval with per-agent history
//! - `audit`: Hash-chained audit trail

pub mod trade;
pub mod rules;
pub mod rule_engine;
pub mod rule_versions;
pub mod circuit_breaker;
pub mod known_programs;
pub mod simulation;
pub mod preflight;
pub mod audit;

pub use trade::{TradeAction, TradeRequest};
pub use rules::{
    default_rules, RuleError, RuleParams, RulePatch, RuleType, RuleViolation, SupervisorDecision,
    SupervisorRule, ViolationSeverity,
};
pub use rule_engine::RuleEngine;
pub use rule_versions::{RuleVersion, RuleVersionError, RuleVersionStore};
pub use circuit_breaker::{
    BreakerCheck, BreakerMetrics, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerRegistry, CircuitBreakerState, CircuitBreakerStatus,
};
pub use known_programs::ProgramDenylist;
pub use simulation::{
    FlagSeverity, RiskFlag, RiskFlagType, SimulationResult, SimulatorConfig, TransactionSimulator,
};
pub use preflight::{PreflightDecision, PreflightGuard, PreflightOutcome, PreflightRequest, PreflightStats};
pub use audit::{
    verify_chain, AuditDecision, AuditError, AuditTrail, AuditTrailEntry, AuditWrite, EventSource,
    ExportFormat, IntegrityReport, SecurityEvent, TrailPage, TrailQuery,
};
