//! Hand-rolled test doubles for every port.
//!
//! Each mock records its calls and returns configured responses, so tests
//! can drive the gateway without a network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::anchor::{AnchorError, AnchorPort};
use super::audit_sink::{AuditSink, AuditSinkError};
use super::custody::{CustodyError, KeyCustodyPort};
use super::risk_data::{RiskData, RiskDataError, RiskDataPort};
use super::rule_store::{RuleStore, RuleStoreError};
use super::simulation::{RawSimulation, SimulationError, SimulationPort};
use crate::domain::audit::AuditTrailEntry;
use crate::domain::rule_versions::RuleVersion;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Simulation endpoint returning queued responses.
///
/// Responses are consumed in order; the last one repeats forever.
#[derive(Debug, Default)]
pub struct MockSimulation {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    responses: Arc<Mutex<VecDeque<Result<RawSimulation, SimulationError>>>>,
    delay: Option<Duration>,
}

impl MockSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, raw: RawSimulation) -> Self {
        lock(&self.responses).push_back(Ok(raw));
        self
    }

    pub fn with_error(self, error: SimulationError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    pub fn then_result(self, raw: RawSimulation) -> Self {
        self.with_result(raw)
    }

    pub fn then_error(self, error: SimulationError) -> Self {
        self.with_error(error)
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Recorded (transaction, wallet) pairs
    pub fn get_calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl SimulationPort for MockSimulation {
    async fn simulate(
        &self,
        transaction: &str,
        wallet_address: &str,
    ) -> Result<RawSimulation, SimulationError> {
        lock(&self.calls).push((transaction.to_string(), wallet_address.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = lock(&self.responses);
        let response = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        response.unwrap_or_else(|| Err(SimulationError::Rpc("No response configured".to_string())))
    }
}

/// Anchoring service returning a fixed proof, or failing
#[derive(Debug, Default)]
pub struct MockAnchor {
    calls: Arc<Mutex<Vec<String>>>,
    proof: Option<String>,
    delay: Option<Duration>,
}

impl MockAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proof(mut self, proof: &str) -> Self {
        self.proof = Some(proof.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.proof = None;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hashes of the entries anchored so far
    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl AnchorPort for MockAnchor {
    async fn anchor(&self, entry: &AuditTrailEntry) -> Result<String, AnchorError> {
        lock(&self.calls).push(entry.hash.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.proof
            .clone()
            .ok_or_else(|| AnchorError::Unavailable("No proof configured".to_string()))
    }
}

/// Audit sink keeping entries in memory, with a failure switch
#[derive(Debug, Default)]
pub struct MockAuditSink {
    persisted: Arc<Mutex<Vec<AuditTrailEntry>>>,
    failing: AtomicBool,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn persisted(&self) -> Vec<AuditTrailEntry> {
        lock(&self.persisted).clone()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn persist(&self, entry: &AuditTrailEntry) -> Result<(), AuditSinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditSinkError::Io("disk full".to_string()));
        }
        lock(&self.persisted).push(entry.clone());
        Ok(())
    }
}

/// Risk data keyed by token address
#[derive(Debug, Default)]
pub struct MockRiskData {
    calls: Arc<Mutex<Vec<String>>>,
    data: Arc<Mutex<HashMap<String, RiskData>>>,
    unavailable: bool,
}

impl MockRiskData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(self, token_address: &str, data: RiskData) -> Self {
        lock(&self.data).insert(token_address.to_string(), data);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl RiskDataPort for MockRiskData {
    async fn risk_data(&self, token_address: &str) -> Result<RiskData, RiskDataError> {
        lock(&self.calls).push(token_address.to_string());
        if self.unavailable {
            return Err(RiskDataError::Unavailable("provider offline".to_string()));
        }
        lock(&self.data)
            .get(token_address)
            .cloned()
            .ok_or_else(|| RiskDataError::UnknownToken(token_address.to_string()))
    }
}

/// Custody provider that "signs" by prefixing the transaction
#[derive(Debug)]
pub struct MockKeyCustody {
    public_key: String,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockKeyCustody {
    pub fn new(public_key: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl KeyCustodyPort for MockKeyCustody {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    async fn sign_transaction(&self, transaction: &str) -> Result<String, CustodyError> {
        lock(&self.calls).push(transaction.to_string());
        Ok(format!("signed:{}", transaction))
    }
}

/// Rule store whose backend is always down
#[derive(Debug, Default)]
pub struct UnavailableRuleStore;

#[async_trait]
impl RuleStore for UnavailableRuleStore {
    async fn list_versions(&self) -> Result<Vec<RuleVersion>, RuleStoreError> {
        Err(RuleStoreError::Unavailable("connection refused".to_string()))
    }

    async fn insert_version(&self, _version: RuleVersion) -> Result<(), RuleStoreError> {
        Err(RuleStoreError::Unavailable("connection refused".to_string()))
    }
}
