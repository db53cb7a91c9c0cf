//! CLI Command Definitions
//!
//! Operator commands for inspecting rules, dry-running decisions and
//! auditing the decision trail.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::domain::audit::ExportFormat;
use crate::domain::trade::TradeAction;

/// Butters Gateway - trade safety gateway for autonomous Solana agents
#[derive(Parser, Debug)]
#[command(
    name = "butters-gateway",
    version = env!("CARGO_PKG_VERSION"),
    about = "Trade safety gateway for autonomous Solana trading agents",
    long_about = "Every proposed agent trade passes a circuit breaker, a policy rule engine \
                  and an optional transaction simulation before it may execute. Each decision \
                  is recorded in a hash-chained audit trail."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/gateway.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the configured rule set
    Rules(RulesCmd),

    /// Evaluate a trade request against the circuit breaker and rules
    Evaluate(EvaluateCmd),

    /// Preflight-simulate a transaction against the configured RPC
    Simulate(SimulateCmd),

    /// Inspect the audit trail
    #[command(subcommand)]
    Audit(AuditCmd),
}

#[derive(Args, Debug)]
pub struct RulesCmd {
    /// Print as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EvaluateCmd {
    /// JSON file holding a trade request
    #[arg(short, long, value_name = "FILE")]
    pub request: PathBuf,

    /// Trade volume fed to the circuit breaker (defaults to the trade amount)
    #[arg(long, value_name = "SOL")]
    pub volume: Option<f64>,

    /// Recent price change in percent fed to the circuit breaker
    #[arg(long, value_name = "PCT", default_value = "0", allow_hyphen_values = true)]
    pub price_change: f64,
}

#[derive(Args, Debug)]
pub struct SimulateCmd {
    /// Encoded transaction (base64 or base58)
    #[arg(long, value_name = "TX")]
    pub tx: String,

    /// Wallet whose balance change is checked
    #[arg(long, value_name = "ADDRESS")]
    pub wallet: String,

    /// Expected balance change in SOL (negative for spends)
    #[arg(long, value_name = "SOL", allow_hyphen_values = true)]
    pub expected: f64,

    /// Agent the transaction belongs to
    #[arg(long, default_value = "operator")]
    pub agent: String,

    #[arg(long, value_enum, default_value = "buy")]
    pub action: CliTradeAction,

    /// Token mint involved in the trade
    #[arg(long, value_name = "MINT")]
    pub token: Option<String>,

    /// Sign with the configured keypair when preflight approves
    #[arg(long)]
    pub sign: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CliTradeAction {
    Buy,
    Sell,
}

impl From<CliTradeAction> for TradeAction {
    fn from(action: CliTradeAction) -> Self {
        match action {
            CliTradeAction::Buy => TradeAction::Buy,
            CliTradeAction::Sell => TradeAction::Sell,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum AuditCmd {
    /// Verify the hash chain of a persisted trail
    Verify(AuditFileArgs),

    /// Export a persisted trail as JSON or CSV
    Export(AuditExportCmd),
}

#[derive(Args, Debug)]
pub struct AuditFileArgs {
    /// Trail file (defaults to [audit].file from the config)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AuditExportCmd {
    #[command(flatten)]
    pub source: AuditFileArgs,

    #[arg(long, value_enum, default_value = "json")]
    pub format: CliExportFormat,

    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CliExportFormat {
    Json,
    Csv,
}

impl From<CliExportFormat> for ExportFormat {
    fn from(format: CliExportFormat) -> Self {
        match format {
            CliExportFormat::Json => ExportFormat::Json,
            CliExportFormat::Csv => ExportFormat::Csv,
        }
    }
}
