//! Configuration Loader
//!
//! Loads and validates gateway configuration from a TOML file. Every section
//! has defaults, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::audit::DEFAULT_ANCHOR_TIMEOUT_MS;
use crate::domain::circuit_breaker::{CircuitBreakerConfig, MAX_BREAKER_DURATION_MS};
use crate::domain::preflight::DEFAULT_HISTORY_LIMIT;
use crate::domain::rule_versions::{DEFAULT_ACTIVATION_DELAY_SECS, DEFAULT_CACHE_TTL_SECS};
use crate::domain::rules::{default_rules, SupervisorRule};
use crate::domain::simulation::SimulatorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rules: RulesSection,
    /// Default breaker applied when an agent is initialized without one
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub preflight: PreflightSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub solana: SolanaSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Rule versioning and rule definitions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// Delay before a changed rule takes effect
    pub activation_delay_secs: i64,
    /// Lifetime of the resolved rule set
    pub cache_ttl_secs: i64,
    /// Rule definitions overriding the built-in defaults by id.
    /// Kept untyped so one malformed definition does not fail the whole load.
    pub definitions: Vec<toml::Value>,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            activation_delay_secs: DEFAULT_ACTIVATION_DELAY_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            definitions: Vec::new(),
        }
    }
}

impl RulesSection {
    /// Built-in defaults with configured definitions applied.
    ///
    /// A definition replaces the default with the same id or is appended.
    /// Definitions that fail to parse or carry invalid params are skipped
    /// with a warning.
    pub fn resolved_rules(&self) -> Vec<SupervisorRule> {
        let mut rules = default_rules();

        for (index, value) in self.definitions.iter().enumerate() {
            let rule: SupervisorRule = match value.clone().try_into() {
                Ok(rule) => rule,
                Err(e) => {
                    tracing::warn!("Skipping rule definition #{}: {}", index, e);
                    continue;
                }
            };
            if let Err(reason) = rule.params.validate() {
                tracing::warn!("Skipping rule definition '{}': {}", rule.id, reason);
                continue;
            }

            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        }
        rules
    }

    pub fn activation_delay(&self) -> chrono::Duration {
        bounded_seconds(self.activation_delay_secs, MAX_ACTIVATION_DELAY_SECS)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        bounded_seconds(self.cache_ttl_secs, MAX_CACHE_TTL_SECS)
    }
}

/// Longest accepted rule activation delay (one year)
pub const MAX_ACTIVATION_DELAY_SECS: i64 = 365 * 24 * 60 * 60;

/// Longest accepted rule cache lifetime (one day)
pub const MAX_CACHE_TTL_SECS: i64 = 24 * 60 * 60;

/// Longest accepted anchoring timeout (ten minutes)
pub const MAX_ANCHOR_TIMEOUT_MS: u64 = 10 * 60 * 1000;

fn bounded_seconds(secs: i64, max: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs.clamp(0, max)).unwrap_or_else(chrono::Duration::zero)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreflightSection {
    /// Decisions kept per agent for statistics
    pub history_limit: usize,
}

impl Default for PreflightSection {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Audit trail persistence and anchoring
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// JSONL file the trail is persisted to; in-memory only when unset
    pub file: Option<String>,
    /// Anchoring service endpoint; entries carry no proof when unset
    pub anchor_url: Option<String>,
    /// Sent as `x-api-key`; prefer GATEWAY_ANCHOR_API_KEY over the file
    pub anchor_api_key: Option<String>,
    pub anchor_timeout_ms: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            file: None,
            anchor_url: None,
            anchor_api_key: None,
            anchor_timeout_ms: DEFAULT_ANCHOR_TIMEOUT_MS,
        }
    }
}

impl AuditSection {
    /// Audit file with GATEWAY_AUDIT_FILE override and `~` expanded
    pub fn get_file(&self) -> Option<PathBuf> {
        std::env::var("GATEWAY_AUDIT_FILE")
            .ok()
            .or_else(|| self.file.clone())
            .map(|path| PathBuf::from(shellexpand::tilde(&path).to_string()))
    }

    /// Anchor endpoint with GATEWAY_ANCHOR_URL override
    pub fn get_anchor_url(&self) -> Option<String> {
        std::env::var("GATEWAY_ANCHOR_URL")
            .ok()
            .or_else(|| self.anchor_url.clone())
    }

    /// Anchor API key with GATEWAY_ANCHOR_API_KEY override
    pub fn get_anchor_api_key(&self) -> Option<String> {
        std::env::var("GATEWAY_ANCHOR_API_KEY")
            .ok()
            .or_else(|| self.anchor_api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Solana RPC configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolanaSection {
    /// Simulation endpoint (use a private RPC in production)
    pub rpc_url: String,
    /// Commitment level: "processed", "confirmed", "finalized"
    pub commitment: String,
    /// Keypair for the custody signer (NEVER commit this file!)
    pub keypair_path: Option<String>,
}

impl Default for SolanaSection {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            keypair_path: None,
        }
    }
}

impl SolanaSection {
    /// Get RPC URL with environment variable override
    /// Checks SOLANA_RPC_URL env var first, falls back to config value
    pub fn get_rpc_url(&self) -> String {
        std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| self.rpc_url.clone())
    }

    /// Keypair path with SOLANA_KEYPAIR_PATH override and `~` expanded
    pub fn get_keypair_path(&self) -> Option<PathBuf> {
        std::env::var("SOLANA_KEYPAIR_PATH")
            .ok()
            .or_else(|| self.keypair_path.clone())
            .map(|path| PathBuf::from(shellexpand::tilde(&path).to_string()))
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).to_string();
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const COMMITMENTS: &[&str] = &["processed", "confirmed", "finalized"];

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value <= 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} must be > 0, got {}",
            name, value
        )));
    }
    Ok(())
}

fn in_range(name: &str, value: i64, max: i64) -> Result<(), ConfigError> {
    if !(0..=max).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{} must be 0-{}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

fn at_most(name: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::ValidationError(format!(
            "{} must be <= {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Rules section
        in_range(
            "rules.activation_delay_secs",
            self.rules.activation_delay_secs,
            MAX_ACTIVATION_DELAY_SECS,
        )?;
        in_range("rules.cache_ttl_secs", self.rules.cache_ttl_secs, MAX_CACHE_TTL_SECS)?;

        // Circuit breaker section
        let breaker = &self.circuit_breaker;
        positive("circuit_breaker.max_volume", breaker.max_volume)?;
        positive("circuit_breaker.max_price_change", breaker.max_price_change)?;
        if breaker.max_trades_per_period == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.max_trades_per_period must be > 0".to_string(),
            ));
        }
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        at_most(
            "circuit_breaker.reset_timeout_ms",
            breaker.reset_timeout_ms,
            MAX_BREAKER_DURATION_MS,
        )?;
        at_most(
            "circuit_breaker.pause_duration_ms",
            breaker.pause_duration_ms,
            MAX_BREAKER_DURATION_MS,
        )?;

        // Simulator section
        positive("simulator.max_slippage_percent", self.simulator.max_slippage_percent)?;
        positive("simulator.max_loss_percent", self.simulator.max_loss_percent)?;
        if self.simulator.max_loss_percent > 100.0 {
            return Err(ConfigError::ValidationError(format!(
                "simulator.max_loss_percent must be 0-100, got {}",
                self.simulator.max_loss_percent
            )));
        }
        if self.simulator.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "simulator.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.preflight.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "preflight.history_limit must be > 0".to_string(),
            ));
        }
        if self.audit.anchor_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "audit.anchor_timeout_ms must be > 0".to_string(),
            ));
        }
        at_most("audit.anchor_timeout_ms", self.audit.anchor_timeout_ms, MAX_ANCHOR_TIMEOUT_MS)?;

        if !COMMITMENTS.contains(&self.solana.commitment.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "solana.commitment must be one of {:?}, got '{}'",
                COMMITMENTS, self.solana.commitment
            )));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }

        Ok(())
    }
}
