//! CLI Adapter
//!
//! Command-line interface for the gateway operator binary.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    AuditCmd, AuditExportCmd, AuditFileArgs, CliApp, CliExportFormat, CliTradeAction, Command,
    EvaluateCmd, RulesCmd, SimulateCmd,
};
