//! Butters Gateway - operator binary
//!
//! Inspect rules, dry-run trade decisions, preflight transactions and audit
//! the decision trail.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use butters_gateway::adapters::cli::{AuditCmd, AuditExportCmd, AuditFileArgs, CliApp, Command, EvaluateCmd, RulesCmd, SimulateCmd};
use butters_gateway::adapters::{load_trail, HttpAnchor, InMemoryRuleStore, JsonlAuditSink, SolanaClient, WalletManager};
use butters_gateway::application::SafetyGateway;
use butters_gateway::config::{load_config, Config, LoggingSection};
use butters_gateway::domain::audit::{export_entries, verify_chain, AuditTrail, ExportFormat};
use butters_gateway::domain::circuit_breaker::BreakerMetrics;
use butters_gateway::domain::preflight::PreflightRequest;
use butters_gateway::domain::trade::TradeRequest;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (RPC URLs and keypair paths go here)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    let (config, config_found) = read_config(&app.config)?;
    init_logging(app.verbose, app.debug, &config.logging)?;
    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", app.config.display());
    }

    match app.command {
        Command::Rules(cmd) => rules_command(cmd, &config),
        Command::Evaluate(cmd) => evaluate_command(cmd, &config).await,
        Command::Simulate(cmd) => simulate_command(cmd, &config).await,
        Command::Audit(AuditCmd::Verify(args)) => verify_command(args, &config),
        Command::Audit(AuditCmd::Export(cmd)) => export_command(cmd, &config),
    }
}

/// A missing file means defaults; a present but invalid file is an error
fn read_config(path: &Path) -> Result<(Config, bool)> {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string());
    if !expanded.exists() {
        return Ok((Config::default(), false));
    }
    let config = load_config(&expanded)
        .with_context(|| format!("Failed to load configuration from {}", expanded.display()))?;
    Ok((config, true))
}

fn init_logging(verbose: bool, debug: bool, logging: &LoggingSection) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

fn rules_command(cmd: RulesCmd, config: &Config) -> Result<()> {
    let rules = config.rules.resolved_rules();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    println!("{:<24} {:<8} {:<20} DESCRIPTION", "ID", "ENABLED", "TYPE");
    for rule in &rules {
        println!(
            "{:<24} {:<8} {:<20} {}",
            rule.id,
            rule.enabled,
            rule.rule_type().as_str(),
            rule.description
        );
    }
    println!(
        "\nChanges take effect {}s after they are made.",
        config.rules.activation_delay_secs
    );
    Ok(())
}

/// Open the configured trail, resuming from its file and wiring the anchor
fn open_audit_trail(config: &Config) -> Result<AuditTrail> {
    let mut trail = match config.audit.get_file() {
        Some(path) => {
            let entries = load_trail(&path)
                .with_context(|| format!("Failed to read audit trail {}", path.display()))?;
            let sink = JsonlAuditSink::new(&path).context("Failed to open audit file")?;
            AuditTrail::from_entries(entries).with_sink(Arc::new(sink))
        }
        None => {
            tracing::warn!("No audit file configured, decisions are kept in memory only");
            AuditTrail::new()
        }
    };

    if let Some(url) = config.audit.get_anchor_url() {
        let mut anchor = HttpAnchor::new(url, Duration::from_millis(config.audit.anchor_timeout_ms))
            .context("Failed to create anchor client")?;
        if let Some(api_key) = config.audit.get_anchor_api_key() {
            anchor = anchor.with_api_key(api_key);
        }
        trail = trail.with_anchor(Arc::new(anchor));
    }
    Ok(trail.with_anchor_timeout(config.audit.anchor_timeout_ms))
}

fn solana_client(config: &Config) -> Result<SolanaClient> {
    SolanaClient::with_timeout(
        config.solana.get_rpc_url(),
        &config.solana.commitment,
        Duration::from_millis(config.simulator.timeout_ms),
    )
    .context("Failed to create Solana client")
}

async fn build_gateway(config: &Config) -> Result<SafetyGateway> {
    let audit = Arc::new(open_audit_trail(config)?);
    let gateway = SafetyGateway::from_config(
        config,
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(solana_client(config)?),
        audit,
    );
    let seeded = gateway
        .rules()
        .bootstrap(config.rules.resolved_rules())
        .await
        .context("Failed to seed rules")?;
    tracing::info!("Seeded {} rules", seeded);
    Ok(gateway)
}

async fn evaluate_command(cmd: EvaluateCmd, config: &Config) -> Result<()> {
    let content = std::fs::read_to_string(&cmd.request)
        .with_context(|| format!("Failed to read trade request {}", cmd.request.display()))?;
    let request: TradeRequest = serde_json::from_str(&content).context("Invalid trade request")?;

    let gateway = build_gateway(config).await?;
    gateway.breakers().initialize_breaker(&request.agent_id, None);

    let metrics = BreakerMetrics {
        volume: cmd.volume.unwrap_or(request.amount_sol),
        price_change: cmd.price_change,
        trade_count: request.daily_trade_count,
    };
    let decision = gateway.evaluate_trade(&request, Some(metrics)).await;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

async fn simulate_command(cmd: SimulateCmd, config: &Config) -> Result<()> {
    let mut gateway = build_gateway(config).await?;

    let request = PreflightRequest {
        agent_id: cmd.agent,
        transaction: cmd.tx,
        wallet_address: cmd.wallet,
        expected_balance_change: cmd.expected,
        action: cmd.action.into(),
        token_address: cmd.token,
    };

    if !cmd.sign {
        let outcome = gateway.preflight(&request).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let Some(keypair_path) = config.solana.get_keypair_path() else {
        bail!("--sign needs solana.keypair_path or SOLANA_KEYPAIR_PATH");
    };
    let wallet = WalletManager::from_file(&keypair_path)
        .with_context(|| format!("Failed to load wallet from {}", keypair_path.display()))?;
    gateway = gateway.with_custody(Arc::new(wallet));

    let outcome = gateway.sign_after_preflight(&request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn trail_path(args: &AuditFileArgs, config: &Config) -> Result<PathBuf> {
    match args.file.clone().or_else(|| config.audit.get_file()) {
        Some(path) => Ok(path),
        None => bail!("No audit file given and none configured"),
    }
}

fn verify_command(args: AuditFileArgs, config: &Config) -> Result<()> {
    let path = trail_path(&args, config)?;
    let entries = load_trail(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = verify_chain(&entries);

    if report.valid {
        println!("Audit trail intact: {} entries", entries.len());
        return Ok(());
    }
    for id in &report.invalid_entries {
        println!("Invalid entry: {}", id);
    }
    bail!(
        "Audit trail integrity check failed: {} of {} entries invalid",
        report.invalid_entries.len(),
        entries.len()
    )
}

fn export_command(cmd: AuditExportCmd, config: &Config) -> Result<()> {
    let path = trail_path(&cmd.source, config)?;
    let entries = load_trail(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let rendered = export_entries(&entries, ExportFormat::from(cmd.format))?;

    match cmd.output {
        Some(output) => {
            std::fs::write(&output, rendered)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!("Exported {} entries to {}", entries.len(), output.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
