//! HTTP Anchoring Client
//!
//! Publishes each audit entry's hash to an external anchoring service and
//! returns the service's proof reference (e.g. a transaction signature).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::audit::AuditTrailEntry;
use crate::ports::anchor::{AnchorError, AnchorPort};

/// Body posted to the anchoring endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorRequest<'a> {
    pub id: &'a str,
    pub hash: &'a str,
    pub previous_hash: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> From<&'a AuditTrailEntry> for AnchorRequest<'a> {
    fn from(entry: &'a AuditTrailEntry) -> Self {
        Self {
            id: &entry.id,
            hash: &entry.hash,
            previous_hash: entry.previous_hash.as_deref(),
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AnchorResponse {
    proof: String,
}

#[derive(Debug, Clone)]
pub struct HttpAnchor {
    url: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpAnchor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AnchorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            api_key: None,
            http,
        })
    }

    /// Sent as `x-api-key` with every anchoring request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, entry: &AuditTrailEntry) -> RequestBuilder {
        let req = self.http.post(&self.url).json(&AnchorRequest::from(entry));
        match &self.api_key {
            Some(api_key) => req.header("x-api-key", api_key),
            None => req,
        }
    }
}

#[async_trait]
impl AnchorPort for HttpAnchor {
    async fn anchor(&self, entry: &AuditTrailEntry) -> Result<String, AnchorError> {
        let response = self
            .request(entry)
            .send()
            .await
            .map_err(|e| AnchorError::Unavailable(e.to_string()))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AnchorError::Unavailable(format!("Anchor service returned {}", status)));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnchorError::Rejected(format!("{}: {}", status, error_text)));
        }

        let body: AnchorResponse = response
            .json()
            .await
            .map_err(|e| AnchorError::Rejected(format!("Failed to parse response: {}", e)))?;
        if body.proof.trim().is_empty() {
            return Err(AnchorError::Rejected("Empty proof".to_string()));
        }
        Ok(body.proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{AuditDecision, EventSource};

    fn entry() -> AuditTrailEntry {
        AuditTrailEntry {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            previous_hash: Some("ab".repeat(32)),
            hash: "cd".repeat(32),
            on_chain_proof: None,
            agent_id: Some("agent".to_string()),
            token_address: None,
            decision: AuditDecision::Approved,
            reason: "ok".to_string(),
            metadata: None,
            source: EventSource::RuleEngine,
        }
    }

    #[test]
    fn test_request_body_carries_only_chain_fields() {
        let entry = entry();
        let json = serde_json::to_value(AnchorRequest::from(&entry)).unwrap();

        assert_eq!(json["id"], "e1");
        assert_eq!(json["hash"], "cd".repeat(32));
        assert_eq!(json["previous_hash"], "ab".repeat(32));
        assert!(json.get("reason").is_none());
        assert!(json.get("agent_id").is_none());
    }

    #[test]
    fn test_api_key_sent_as_header() {
        let anchor = HttpAnchor::new("http://127.0.0.1:1/anchor", Duration::from_millis(500)).unwrap();
        let plain = anchor.request(&entry()).build().unwrap();
        assert!(plain.headers().get("x-api-key").is_none());

        let keyed = anchor.with_api_key("s3cret").request(&entry()).build().unwrap();
        assert_eq!(keyed.headers().get("x-api-key").unwrap().to_str().unwrap(), "s3cret");
        assert_eq!(keyed.url().as_str(), "http://127.0.0.1:1/anchor");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let anchor = HttpAnchor::new("http://127.0.0.1:1/anchor", Duration::from_millis(500)).unwrap();
        let result = anchor.anchor(&entry()).await;
        assert!(matches!(result, Err(AnchorError::Unavailable(_))));
    }
}
