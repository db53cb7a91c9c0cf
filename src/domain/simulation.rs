//! Transaction Simulator
//!
//! Dry-runs a proposed transaction through a `SimulationPort` and classifies
//! the outcome:
//! - Denylisted program in the logs: critical `DRAINER_DETECTED`, analysis stops
//! - Realized balance change far from the expected one: `HIGH_SLIPPAGE`
//! - Balance drop too large relative to the pre-trade balance: `EXCESSIVE_LOSS`
//! - RPC failure, timeout or runtime error: critical `UNKNOWN_PROGRAM`
//!
//! `simulate` never returns an error. Callers always get a `SimulationResult`,
//! and any result carrying a critical flag is not approved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::known_programs::{invoked_programs, is_known_program, ProgramDenylist};
use crate::ports::simulation::{RawSimulation, SimulationPort};

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Default slippage tolerance before HIGH_SLIPPAGE is raised (%)
pub const DEFAULT_MAX_SLIPPAGE_PERCENT: f64 = 5.0;

/// Default max balance drop relative to the pre-trade balance (%)
pub const DEFAULT_MAX_LOSS_PERCENT: f64 = 20.0;

/// Slippage above this is critical regardless of configuration (%)
pub const CRITICAL_SLIPPAGE_PERCENT: f64 = 50.0;

/// Hard deadline for one simulation call
pub const DEFAULT_SIMULATION_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlagType {
    HighSlippage,
    DrainerDetected,
    UnknownProgram,
    ExcessiveLoss,
}

impl RiskFlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlagType::HighSlippage => "HIGH_SLIPPAGE",
            RiskFlagType::DrainerDetected => "DRAINER_DETECTED",
            RiskFlagType::UnknownProgram => "UNKNOWN_PROGRAM",
            RiskFlagType::ExcessiveLoss => "EXCESSIVE_LOSS",
        }
    }
}

impl fmt::Display for RiskFlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    #[serde(rename = "type")]
    pub flag_type: RiskFlagType,
    pub severity: FlagSeverity,
    pub message: String,
}

impl RiskFlag {
    pub fn critical(flag_type: RiskFlagType, message: impl Into<String>) -> Self {
        Self {
            flag_type,
            severity: FlagSeverity::Critical,
            message: message.into(),
        }
    }

    pub fn warning(flag_type: RiskFlagType, message: impl Into<String>) -> Self {
        Self {
            flag_type,
            severity: FlagSeverity::Warning,
            message: message.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == FlagSeverity::Critical
    }
}

/// Outcome of simulating one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// The simulation itself ran to completion
    pub success: bool,
    /// No critical flag was raised
    pub approved: bool,
    /// Realized wallet balance change (SOL)
    pub balance_change: f64,
    /// Balance change the caller expected (SOL)
    pub expected_change: f64,
    pub slippage_percent: f64,
    pub risk_flags: Vec<RiskFlag>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

impl SimulationResult {
    /// Result for a simulation that could not complete
    pub fn failed(expected_change: f64, error: impl Into<String>, logs: Vec<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            approved: false,
            balance_change: 0.0,
            expected_change,
            slippage_percent: 0.0,
            risk_flags: vec![RiskFlag::critical(
                RiskFlagType::UnknownProgram,
                format!("Simulation failed: {}", error),
            )],
            logs,
            error: Some(error),
        }
    }

    pub fn critical_flags(&self) -> impl Iterator<Item = &RiskFlag> {
        self.risk_flags.iter().filter(|f| f.is_critical())
    }

    pub fn has_flag(&self, flag_type: RiskFlagType) -> bool {
        self.risk_flags.iter().any(|f| f.flag_type == flag_type)
    }
}

/// Simulator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub max_slippage_percent: f64,
    pub max_loss_percent: f64,
    pub timeout_ms: u64,
    /// Raise a warning for every invoked program that is neither a known
    /// system/DEX program nor denylisted
    pub flag_unknown_programs: bool,
    /// Initial denylist entries
    pub denylist: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_slippage_percent: DEFAULT_MAX_SLIPPAGE_PERCENT,
            max_loss_percent: DEFAULT_MAX_LOSS_PERCENT,
            timeout_ms: DEFAULT_SIMULATION_TIMEOUT_MS,
            flag_unknown_programs: false,
            denylist: Vec::new(),
        }
    }
}

/// `|actual - expected| / |expected| * 100`, or 0 when nothing was expected
pub fn slippage_percent(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        return 0.0;
    }
    (actual - expected).abs() / expected.abs() * 100.0
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}

pub struct TransactionSimulator {
    port: Arc<dyn SimulationPort>,
    config: SimulatorConfig,
    denylist: Arc<RwLock<ProgramDenylist>>,
}

impl TransactionSimulator {
    pub fn new(port: Arc<dyn SimulationPort>, config: SimulatorConfig) -> Self {
        let denylist = ProgramDenylist::with_entries(config.denylist.iter().cloned());
        Self {
            port,
            config,
            denylist: Arc::new(RwLock::new(denylist)),
        }
    }

    /// Share an existing denylist, e.g. one updated by a threat feed
    pub fn with_denylist(mut self, denylist: Arc<RwLock<ProgramDenylist>>) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn denylist(&self) -> Arc<RwLock<ProgramDenylist>> {
        Arc::clone(&self.denylist)
    }

    pub fn add_to_denylist(&self, entry: impl Into<String>) -> bool {
        self.denylist
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(entry)
    }

    pub fn remove_from_denylist(&self, entry: &str) -> bool {
        self.denylist
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(entry)
    }

    /// Simulate `transaction` for `wallet_address` and classify the outcome.
    ///
    /// `expected_change` is the wallet balance change the caller expects, in SOL.
    pub async fn simulate(
        &self,
        transaction: &str,
        wallet_address: &str,
        expected_change: f64,
    ) -> SimulationResult {
        let deadline = Duration::from_millis(self.config.timeout_ms);
        let raw = match tokio::time::timeout(deadline, self.port.simulate(transaction, wallet_address)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(wallet = %wallet_address, error = %e, "Simulation failed");
                return SimulationResult::failed(expected_change, e.to_string(), Vec::new());
            }
            Err(_) => {
                tracing::warn!(
                    wallet = %wallet_address,
                    timeout_ms = self.config.timeout_ms,
                    "Simulation timed out"
                );
                return SimulationResult::failed(
                    expected_change,
                    format!("Simulation timed out after {}ms", self.config.timeout_ms),
                    Vec::new(),
                );
            }
        };

        self.analyze(raw, expected_change)
    }

    /// Classify a completed simulation
    pub fn analyze(&self, raw: RawSimulation, expected_change: f64) -> SimulationResult {
        if let Some(error) = raw.error {
            tracing::warn!(error = %error, "Simulated transaction failed");
            return SimulationResult::failed(expected_change, error, raw.logs);
        }

        let pre_sol = lamports_to_sol(raw.pre_balance);
        let balance_change = lamports_to_sol(raw.post_balance) - pre_sol;

        let denylisted = self
            .denylist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .find_match(&raw.logs);
        if let Some(program) = denylisted {
            tracing::error!(program = %program, "Drainer program detected in simulation logs");
            return SimulationResult {
                success: true,
                approved: false,
                balance_change,
                expected_change,
                slippage_percent: 0.0,
                risk_flags: vec![RiskFlag::critical(
                    RiskFlagType::DrainerDetected,
                    format!("Known malicious program detected: {}", program),
                )],
                logs: raw.logs,
                error: None,
            };
        }

        let mut flags = Vec::new();

        let slippage = slippage_percent(balance_change, expected_change);
        if slippage > self.config.max_slippage_percent {
            let message = format!(
                "Slippage {:.2}% exceeds maximum {:.2}%",
                slippage, self.config.max_slippage_percent
            );
            if slippage > CRITICAL_SLIPPAGE_PERCENT {
                flags.push(RiskFlag::critical(RiskFlagType::HighSlippage, message));
            } else {
                flags.push(RiskFlag::warning(RiskFlagType::HighSlippage, message));
            }
        }

        if balance_change < 0.0 && pre_sol > 0.0 {
            let loss_percent = -balance_change / pre_sol * 100.0;
            if loss_percent > self.config.max_loss_percent {
                flags.push(RiskFlag::critical(
                    RiskFlagType::ExcessiveLoss,
                    format!(
                        "Balance drop {:.2}% exceeds maximum loss {:.2}%",
                        loss_percent, self.config.max_loss_percent
                    ),
                ));
            }
        }

        if self.config.flag_unknown_programs {
            for program in invoked_programs(&raw.logs) {
                if !is_known_program(&program) {
                    flags.push(RiskFlag::warning(
                        RiskFlagType::UnknownProgram,
                        format!("Unrecognized program invoked: {}", program),
                    ));
                }
            }
        }

        let approved = !flags.iter().any(RiskFlag::is_critical);
        tracing::debug!(
            balance_change,
            expected_change,
            slippage,
            flags = flags.len(),
            approved,
            "Simulation analyzed"
        );

        SimulationResult {
            success: true,
            approved,
            balance_change,
            expected_change,
            slippage_percent: slippage,
            risk_flags: flags,
            logs: raw.logs,
            error: None,
        }
    }
}
