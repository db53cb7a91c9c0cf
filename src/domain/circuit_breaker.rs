//! Circuit Breaker
//!
//! Per-agent state machine that halts trading when volume, price movement or
//! trade frequency exceed thresholds, independent of the rule engine.
//!
//! closed -> open once `failure_threshold` trips accumulate, open stays open
//! until `paused_until`, then half-open after the reset timeout, and
//! half-open always gets exactly one fresh chance on the next check.
//!
//! Breakers are opt-in: an agent without an initialized breaker is always
//! allowed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;

/// Default maximum volume per check in SOL
pub const DEFAULT_MAX_VOLUME_SOL: f64 = 100.0;

/// Default maximum absolute price change in percent
pub const DEFAULT_MAX_PRICE_CHANGE_PCT: f64 = 20.0;

/// Default maximum trades per period
pub const DEFAULT_MAX_TRADES_PER_PERIOD: u32 = 20;

/// Default trips before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time after a reset before an open breaker may probe again (ms)
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;

/// Default pause after opening (ms)
pub const DEFAULT_PAUSE_DURATION_MS: u64 = 300_000;

/// Upper bound applied to reset timeout and pause duration (one year, ms)
pub const MAX_BREAKER_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitBreakerError {
    #[error("No circuit breaker initialized for agent {0}")]
    NotInitialized(String),
}

/// Status of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitBreakerStatus {
    /// Normal operation
    Closed,
    /// Tripped, rejecting every check
    Open,
    /// Probation after the pause, the next check closes it
    HalfOpen,
}

impl CircuitBreakerStatus {
    pub fn description(&self) -> &'static str {
        match self {
            CircuitBreakerStatus::Closed => "Trading active - all systems nominal",
            CircuitBreakerStatus::Open => "Circuit breaker OPEN - trading halted",
            CircuitBreakerStatus::HalfOpen => "Half-open - next check decides whether trading resumes",
        }
    }
}

/// Thresholds and timings for one agent's breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_volume: f64,
    /// Absolute percent change
    pub max_price_change: f64,
    pub max_trades_per_period: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub pause_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_volume: DEFAULT_MAX_VOLUME_SOL,
            max_price_change: DEFAULT_MAX_PRICE_CHANGE_PCT,
            max_trades_per_period: DEFAULT_MAX_TRADES_PER_PERIOD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            pause_duration_ms: DEFAULT_PAUSE_DURATION_MS,
        }
    }
}

impl CircuitBreakerConfig {
    fn reset_timeout(&self) -> Duration {
        capped_millis(self.reset_timeout_ms)
    }

    fn pause_duration(&self) -> Duration {
        capped_millis(self.pause_duration_ms)
    }
}

fn capped_millis(ms: u64) -> Duration {
    let ms = i64::try_from(ms.min(MAX_BREAKER_DURATION_MS)).unwrap_or(i64::MAX);
    Duration::try_milliseconds(ms).unwrap_or(Duration::MAX)
}

/// `now + delta`, saturating at the latest representable instant
fn saturating_add(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Metrics observed for one prospective trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub volume: f64,
    /// Signed percent change, compared by absolute value
    pub price_change: f64,
    pub trade_count: u32,
}

/// Result of a breaker check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub status: CircuitBreakerStatus,
    /// True only for the call that moved the breaker to open
    pub tripped: bool,
}

impl BreakerCheck {
    fn allow(status: CircuitBreakerStatus) -> Self {
        Self {
            allowed: true,
            reason: None,
            status,
            tripped: false,
        }
    }

    fn deny(status: CircuitBreakerStatus, reason: String, tripped: bool) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            status,
            tripped,
        }
    }
}

/// Snapshot of one agent's breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub agent_id: String,
    pub config: CircuitBreakerConfig,
    pub status: CircuitBreakerStatus,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_reset_time: DateTime<Utc>,
    pub paused_until: Option<DateTime<Utc>>,
    pub trip_reason: Option<String>,
}

impl CircuitBreakerState {
    pub fn new(agent_id: impl Into<String>, config: CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            status: CircuitBreakerStatus::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_reset_time: now,
            paused_until: None,
            trip_reason: None,
        }
    }

    /// Run the state transitions and threshold checks for one trade.
    ///
    /// Metrics are checked volume, price change, trade count; the first
    /// exceeded threshold trips and short-circuits. NaN metrics count as
    /// exceeded.
    pub fn check(&mut self, metrics: &BreakerMetrics, now: DateTime<Utc>) -> BreakerCheck {
        if self.status == CircuitBreakerStatus::Open {
            if let Some(until) = self.paused_until {
                if now < until {
                    return BreakerCheck::deny(
                        self.status,
                        format!("Circuit breaker open, trading paused until {}", until.to_rfc3339()),
                        false,
                    );
                }
            }
            if now - self.last_reset_time > self.config.reset_timeout() {
                tracing::info!("Circuit breaker for {} entering half-open", self.agent_id);
                self.status = CircuitBreakerStatus::HalfOpen;
                self.last_reset_time = now;
            } else {
                let ready_at = saturating_add(self.last_reset_time, self.config.reset_timeout());
                return BreakerCheck::deny(
                    self.status,
                    format!("Circuit breaker open, awaiting reset timeout until {}", ready_at.to_rfc3339()),
                    false,
                );
            }
        }

        if self.status == CircuitBreakerStatus::HalfOpen {
            self.status = CircuitBreakerStatus::Closed;
            self.failure_count = 0;
            self.paused_until = None;
            self.trip_reason = None;
            tracing::info!("Circuit breaker for {} closed after probation", self.agent_id);
        }

        let exceeded = if !(metrics.volume <= self.config.max_volume) {
            Some(format!(
                "Volume {:.2} exceeds maximum {:.2}",
                metrics.volume, self.config.max_volume
            ))
        } else if !(metrics.price_change.abs() <= self.config.max_price_change) {
            Some(format!(
                "Price change {:.2}% exceeds maximum {:.2}%",
                metrics.price_change.abs(),
                self.config.max_price_change
            ))
        } else if metrics.trade_count > self.config.max_trades_per_period {
            Some(format!(
                "Trade count {} exceeds maximum {} per period",
                metrics.trade_count, self.config.max_trades_per_period
            ))
        } else {
            None
        };

        match exceeded {
            Some(reason) => {
                let opened = self.trip(&reason, now);
                BreakerCheck::deny(self.status, reason, opened)
            }
            None => BreakerCheck::allow(self.status),
        }
    }

    /// Record one failure; returns true if this call opened the breaker
    pub fn trip(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        self.failure_count += 1;
        self.last_failure_time = Some(now);
        self.trip_reason = Some(reason.to_string());

        if self.failure_count < self.config.failure_threshold {
            tracing::warn!(
                "Circuit breaker for {} recorded failure {}/{}: {}",
                self.agent_id,
                self.failure_count,
                self.config.failure_threshold,
                reason
            );
            return false;
        }

        let was_open = self.status == CircuitBreakerStatus::Open;
        self.status = CircuitBreakerStatus::Open;
        self.paused_until = Some(saturating_add(now, self.config.pause_duration()));

        if !was_open {
            tracing::error!(
                "CIRCUIT BREAKER TRIPPED for {}: {} ({} failures)",
                self.agent_id,
                reason,
                self.failure_count
            );
        }
        !was_open
    }

    /// Clear counters and close; the entry itself is kept
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.status = CircuitBreakerStatus::Closed;
        self.failure_count = 0;
        self.last_failure_time = None;
        self.last_reset_time = now;
        self.paused_until = None;
        self.trip_reason = None;
        tracing::info!("Circuit breaker for {} reset", self.agent_id);
    }

    /// Time left in the current pause, if any
    pub fn pause_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.paused_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// All agents' breakers, each behind its own lock
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreakerState>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose `initialize_breaker(.., None)` uses `config`
    pub fn with_default_config(config: CircuitBreakerConfig) -> Self {
        Self {
            default_config: config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn initialize_breaker(&self, agent_id: &str, config: Option<CircuitBreakerConfig>) -> CircuitBreakerState {
        self.initialize_breaker_at(agent_id, config, Utc::now())
    }

    /// Create (or replace) an agent's breaker in the closed state
    pub fn initialize_breaker_at(
        &self,
        agent_id: &str,
        config: Option<CircuitBreakerConfig>,
        now: DateTime<Utc>,
    ) -> CircuitBreakerState {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let state = CircuitBreakerState::new(agent_id, config, now);

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers.insert(agent_id.to_string(), Arc::new(Mutex::new(state.clone())));
        tracing::info!("Circuit breaker initialized for {}", agent_id);
        state
    }

    pub fn check_breaker(&self, agent_id: &str, metrics: &BreakerMetrics) -> BreakerCheck {
        self.check_breaker_at(agent_id, metrics, Utc::now())
    }

    pub fn check_breaker_at(&self, agent_id: &str, metrics: &BreakerMetrics, now: DateTime<Utc>) -> BreakerCheck {
        let Some(entry) = self.entry(agent_id) else {
            return BreakerCheck::allow(CircuitBreakerStatus::Closed);
        };
        let check = lock(&entry).check(metrics, now);
        if !check.allowed {
            tracing::warn!(
                "Circuit breaker denied trade for {}: {}",
                agent_id,
                check.reason.as_deref().unwrap_or("unknown")
            );
        }
        check
    }

    pub fn trip_breaker(&self, agent_id: &str, reason: &str) -> Result<CircuitBreakerState, CircuitBreakerError> {
        self.trip_breaker_at(agent_id, reason, Utc::now())
    }

    pub fn trip_breaker_at(
        &self,
        agent_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CircuitBreakerState, CircuitBreakerError> {
        let entry = self
            .entry(agent_id)
            .ok_or_else(|| CircuitBreakerError::NotInitialized(agent_id.to_string()))?;
        let mut state = lock(&entry);
        state.trip(reason, now);
        Ok(state.clone())
    }

    pub fn reset_breaker(&self, agent_id: &str) -> Result<CircuitBreakerState, CircuitBreakerError> {
        self.reset_breaker_at(agent_id, Utc::now())
    }

    pub fn reset_breaker_at(&self, agent_id: &str, now: DateTime<Utc>) -> Result<CircuitBreakerState, CircuitBreakerError> {
        let entry = self
            .entry(agent_id)
            .ok_or_else(|| CircuitBreakerError::NotInitialized(agent_id.to_string()))?;
        let mut state = lock(&entry);
        state.reset(now);
        Ok(state.clone())
    }

    pub fn get_breaker_state(&self, agent_id: &str) -> Option<CircuitBreakerState> {
        let entry = self.entry(agent_id)?;
        let state = lock(&entry).clone();
        Some(state)
    }

    pub fn list_agents(&self) -> Vec<String> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut agents: Vec<String> = breakers.keys().cloned().collect();
        agents.sort();
        agents
    }

    fn entry(&self, agent_id: &str) -> Option<Arc<Mutex<CircuitBreakerState>>> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers.get(agent_id).cloned()
    }
}

// State is only mutated through the methods above, which never panic
// mid-update, so a poisoned lock still holds a consistent state.
fn lock(entry: &Mutex<CircuitBreakerState>) -> MutexGuard<'_, CircuitBreakerState> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}
