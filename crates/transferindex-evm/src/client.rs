//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! A single-request transport: no retry here. Retry with classification lives
//! at the gateway, per operation, so each logical chain query owns its backoff
//! budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use transferindex_core::error::IndexerError;

use crate::request::{JsonRpcRequest, JsonRpcResponse};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP JSON-RPC client for a single endpoint.
pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one JSON-RPC call and unwrap its result value.
    ///
    /// HTTP-level failures map to [`IndexerError::Rpc`] with the status (or a
    /// `timeout` marker) in the message so the classifier can see them;
    /// node-side errors map to [`IndexerError::RpcCode`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IndexerError::Rpc(format!("request timeout: {e}"))
                } else {
                    IndexerError::Rpc(format!("no response from {method}: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!("HTTP {}: {body}", status.as_u16())));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| IndexerError::Rpc(format!("malformed response to {method}: {e}")))?;

        resp.into_result().map_err(|e| IndexerError::RpcCode {
            code: e.code,
            message: e.message,
        })
    }
}
