//! HTTP gateway client.
//!
//! Talks to a ledger gateway's JSON endpoints with `ureq`. All calls are
//! blocking under the hood and are moved off the async reactor with
//! `spawn_blocking`; transient failures are retried with exponential
//! backoff per [`RetryConfig`].
//!
//! ## Endpoints
//! - `GET  /tx/{id}` - transaction metadata and tags
//! - `GET  /tx/{id}/data` - raw data payload
//! - `POST /interactions` - paged interaction query
//! - `POST /tx` - submit a transaction
//! - `GET  /info` - chain head info

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use weave_types::tags::TagMap;
use weave_types::{Address, ContractId, RetryConfig, TxId};

use crate::client::{BlockRef, InteractionPage, LedgerClient, TransactionDraft, TxMetadata};

/// Default public gateway.
pub const DEFAULT_GATEWAY: &str = "https://gateway.weavenet.io";

/// Cap on a single data payload fetch (64 MiB). A gateway response larger
/// than this is treated as a transport fault.
const MAX_DATA_BYTES: u64 = 64 * 1024 * 1024;

/// HTTP client for a ledger gateway.
#[derive(Clone)]
pub struct HttpGateway {
    endpoint: String,
    agent: ureq::Agent,
    retry: RetryConfig,
}

impl HttpGateway {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn default_timeouts() -> (Duration, Duration) {
        let timeout_secs = std::env::var("WEAVE_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        let connect_secs = std::env::var("WEAVE_GATEWAY_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT_SECS);
        (
            Duration::from_secs(timeout_secs),
            Duration::from_secs(connect_secs),
        )
    }

    fn build_agent(timeout: Duration, connect_timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .build()
    }

    /// Create a client for a custom gateway endpoint.
    pub fn new(endpoint: &str) -> Self {
        let (timeout, connect_timeout) = Self::default_timeouts();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent: Self::build_agent(timeout, connect_timeout),
            retry: RetryConfig::default(),
        }
    }

    /// Create a client from `WEAVE_GATEWAY_URL`, falling back to the
    /// default public gateway.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("WEAVE_GATEWAY_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GATEWAY.to_string());
        Self::new(&endpoint)
    }

    /// Override retry behavior.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Run a request closure with retries. `Ok(None)` is the not-found
    /// signal and is never retried; transport errors and 429/5xx are.
    fn with_retries<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> std::result::Result<T, ureq::Error>,
    ) -> Result<Option<T>> {
        let mut attempt = 0usize;
        loop {
            match call() {
                Ok(value) => return Ok(Some(value)),
                Err(ureq::Error::Status(404, _)) => return Ok(None),
                Err(err) if attempt < self.retry.retries && is_retryable(&err) => {
                    let delay = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "gateway request failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(anyhow!("{} failed: {}", operation, err)),
            }
        }
    }

    fn fetch_transaction_blocking(&self, id: &TxId) -> Result<Option<TxMetadata>> {
        let url = self.url(&format!("/tx/{}", id));
        let response = self.with_retries("fetch transaction", || self.agent.get(&url).call())?;
        match response {
            None => Ok(None),
            Some(resp) => {
                let value: Value = resp
                    .into_json()
                    .map_err(|e| anyhow!("failed to parse transaction response: {}", e))?;
                Ok(Some(parse_tx_metadata(&value)?))
            }
        }
    }

    fn fetch_data_blocking(&self, id: &TxId) -> Result<Option<Vec<u8>>> {
        let url = self.url(&format!("/tx/{}/data", id));
        let response = self.with_retries("fetch data", || self.agent.get(&url).call())?;
        match response {
            None => Ok(None),
            Some(resp) => {
                let mut bytes = Vec::new();
                resp.into_reader()
                    .take(MAX_DATA_BYTES)
                    .read_to_end(&mut bytes)
                    .map_err(|e| anyhow!("failed to read data payload: {}", e))?;
                Ok(Some(bytes))
            }
        }
    }

    fn query_interactions_blocking(
        &self,
        contract_id: &ContractId,
        from_height: u64,
        to_height: u64,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<InteractionPage> {
        let url = self.url("/interactions");
        let body = json!({
            "contract": contract_id.as_str(),
            "from": from_height,
            "to": to_height,
            "cursor": cursor,
            "limit": page_size,
        });
        let resp = self
            .with_retries("query interactions", || {
                self.agent
                    .post(&url)
                    .set("Content-Type", "application/json")
                    .send_json(&body)
            })?
            .ok_or_else(|| anyhow!("interaction query endpoint not found at {}", url))?;

        let value: Value = resp
            .into_json()
            .map_err(|e| anyhow!("failed to parse interaction query response: {}", e))?;

        let items = value
            .get("items")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().map(parse_tx_metadata).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        let next_cursor = value
            .get("next_cursor")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(InteractionPage { items, next_cursor })
    }

    fn submit_transaction_blocking(&self, draft: &TransactionDraft) -> Result<TxId> {
        let url = self.url("/tx");
        let tags: Vec<Value> = draft
            .tags
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        let body = json!({
            "tags": tags,
            "data": STANDARD.encode(&draft.data),
        });
        let resp = self
            .with_retries("submit transaction", || {
                self.agent
                    .post(&url)
                    .set("Content-Type", "application/json")
                    .send_json(&body)
            })?
            .ok_or_else(|| anyhow!("submission endpoint not found at {}", url))?;

        let value: Value = resp
            .into_json()
            .map_err(|e| anyhow!("failed to parse submission response: {}", e))?;
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("submission response missing transaction id"))?;
        Ok(TxId::new(id))
    }

    fn current_height_blocking(&self) -> Result<u64> {
        let url = self.url("/info");
        let resp = self
            .with_retries("fetch network info", || self.agent.get(&url).call())?
            .ok_or_else(|| anyhow!("network info endpoint not found at {}", url))?;
        let value: Value = resp
            .into_json()
            .map_err(|e| anyhow!("failed to parse network info: {}", e))?;
        value
            .get("height")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("network info missing height"))
    }
}

fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Transport(_) => true,
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
    }
}

/// Parse one transaction record from gateway JSON.
fn parse_tx_metadata(value: &Value) -> Result<TxMetadata> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("transaction record missing id"))?;
    let owner = value.get("owner").and_then(|v| v.as_str()).unwrap_or("");

    let mut tags = TagMap::new();
    if let Some(arr) = value.get("tags").and_then(|v| v.as_array()) {
        for entry in arr {
            let name = entry.get("name").and_then(|v| v.as_str());
            let tag_value = entry.get("value").and_then(|v| v.as_str());
            if let (Some(name), Some(tag_value)) = (name, tag_value) {
                tags.insert(name.to_string(), tag_value.to_string());
            }
        }
    }

    let block = match value.get("block") {
        None | Some(Value::Null) => None,
        Some(block) => Some(BlockRef {
            height: block
                .get("height")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| anyhow!("block record missing height for tx {}", id))?,
            indep_hash: block
                .get("indep_hash")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("block record missing indep_hash for tx {}", id))?
                .to_string(),
        }),
    };

    Ok(TxMetadata {
        id: TxId::new(id),
        owner: Address::new(owner),
        tags,
        block,
    })
}

#[async_trait]
impl LedgerClient for HttpGateway {
    async fn fetch_transaction(&self, id: &TxId) -> Result<Option<TxMetadata>> {
        let this = self.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || this.fetch_transaction_blocking(&id))
            .await
            .map_err(|e| anyhow!("fetch task failed: {}", e))?
    }

    async fn fetch_data(&self, id: &TxId) -> Result<Option<Vec<u8>>> {
        let this = self.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || this.fetch_data_blocking(&id))
            .await
            .map_err(|e| anyhow!("fetch task failed: {}", e))?
    }

    async fn query_interactions(
        &self,
        contract_id: &ContractId,
        from_height: u64,
        to_height: u64,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<InteractionPage> {
        let this = self.clone();
        let contract_id = contract_id.clone();
        tokio::task::spawn_blocking(move || {
            this.query_interactions_blocking(&contract_id, from_height, to_height, cursor, page_size)
        })
        .await
        .map_err(|e| anyhow!("query task failed: {}", e))?
    }

    async fn submit_transaction(&self, draft: TransactionDraft) -> Result<TxId> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.submit_transaction_blocking(&draft))
            .await
            .map_err(|e| anyhow!("submit task failed: {}", e))?
    }

    async fn current_height(&self) -> Result<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.current_height_blocking())
            .await
            .map_err(|e| anyhow!("info task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_confirmed_transaction() {
        let value = json!({
            "id": "tx-abc",
            "owner": "addr-1",
            "tags": [
                {"name": "App-Name", "value": "WeaveAction"},
                {"name": "Contract", "value": "c-1"}
            ],
            "block": {"height": 42, "indep_hash": "blk-42"}
        });
        let meta = parse_tx_metadata(&value).unwrap();
        assert_eq!(meta.id, TxId::new("tx-abc"));
        assert_eq!(meta.owner, Address::new("addr-1"));
        assert_eq!(meta.tags.get("Contract").map(String::as_str), Some("c-1"));
        assert_eq!(meta.block.as_ref().unwrap().height, 42);
        assert!(meta.is_confirmed());
    }

    #[test]
    fn pending_transaction_has_no_block() {
        let value = json!({"id": "tx-abc", "owner": "addr-1", "tags": [], "block": null});
        let meta = parse_tx_metadata(&value).unwrap();
        assert!(meta.block.is_none());
        assert!(!meta.is_confirmed());
    }

    #[test]
    fn record_without_id_is_rejected() {
        let value = json!({"owner": "addr-1"});
        assert!(parse_tx_metadata(&value).is_err());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let gateway = HttpGateway::new("https://example.com/");
        assert_eq!(gateway.endpoint(), "https://example.com");
        assert_eq!(gateway.url("/info"), "https://example.com/info");
    }
}
