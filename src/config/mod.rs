//! Configuration Module
//!
//! Loads and validates gateway configuration from TOML files.

pub mod loader;

pub use loader::{
    AuditSection, Config, ConfigError, LoggingSection, PreflightSection, RulesSection,
    SolanaSection, load_config,
};
