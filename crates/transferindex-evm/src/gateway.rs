//! The chain gateway: retrying chain queries over a JSON-RPC transport.
//!
//! Every operation is wrapped in bounded exponential backoff (5 attempts) with
//! the transient/permanent classifier; the caller receives the last error once
//! the budget is exhausted and decides whether to propagate or continue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use transferindex_core::decode::TRANSFER_TOPIC0;
use transferindex_core::error::{IndexerError, RETRYABLE_RPC_CODES};
use transferindex_core::retry::{retry, RetryPolicy};
use transferindex_core::types::BlockHeader;

use crate::client::HttpClient;

/// Counter: RPC errors by `type` label (`rate_limit`, `timeout`, `node_lag`,
/// `internal`, `unknown`).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if the node flagged this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Minimal JSON-RPC transport seam, so the gateway's retry behavior is
/// testable without a live endpoint.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError>;
}

#[async_trait]
impl RpcTransport for HttpClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        HttpClient::call(self, method, params).await
    }
}

/// Chain queries the indexer consumes.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Current chain tip height.
    async fn latest_height(&self) -> Result<u64, IndexerError>;
    /// Canonical block at `number`, as the node currently believes.
    async fn block_at(&self, number: u64) -> Result<BlockHeader, IndexerError>;
    /// Transfer-topic logs in the inclusive range `[from, to]`.
    async fn transfers_in_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError>;
}

/// Gateway over a JSON-RPC transport, with per-operation retry.
pub struct HttpGateway<T = HttpClient> {
    transport: T,
    policy: RetryPolicy,
}

impl HttpGateway<HttpClient> {
    pub fn new(url: impl Into<String>) -> Result<Self, IndexerError> {
        Ok(Self::with_transport(HttpClient::new(url)?))
    }
}

impl<T: RpcTransport> HttpGateway<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn call_counted(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        self.transport.call(method, params).await.map_err(|e| {
            metrics::counter!(RPC_ERRORS_TOTAL, "type" => rpc_error_type(&e)).increment(1);
            e
        })
    }
}

#[async_trait]
impl<T: RpcTransport> ChainGateway for HttpGateway<T> {
    async fn latest_height(&self) -> Result<u64, IndexerError> {
        retry(&self.policy, "eth_blockNumber", || async move {
            let result = self.call_counted("eth_blockNumber", vec![]).await?;
            let raw = result
                .as_str()
                .ok_or_else(|| IndexerError::Rpc("blockNumber result not a string".into()))?;
            Ok(parse_hex_u64(raw))
        })
        .await
    }

    async fn block_at(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        retry(&self.policy, "eth_getBlockByNumber", || async move {
            let result = self
                .call_counted(
                    "eth_getBlockByNumber",
                    vec![json!(format!("0x{number:x}")), json!(false)],
                )
                .await?;
            if result.is_null() {
                // Node lag: the tip we just read is ahead of this replica.
                return Err(IndexerError::Rpc(format!("header not found: block {number}")));
            }
            block_from_json(&result)
                .ok_or_else(|| IndexerError::Rpc(format!("malformed block {number} response")))
        })
        .await
    }

    async fn transfers_in_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        retry(&self.policy, "eth_getLogs", || async move {
            let filter = json!({
                "fromBlock": format!("0x{from:x}"),
                "toBlock": format!("0x{to:x}"),
                "topics": [TRANSFER_TOPIC0],
            });
            let result = self.call_counted("eth_getLogs", vec![filter]).await?;
            serde_json::from_value::<Vec<RawLog>>(result)
                .map_err(|e| IndexerError::Rpc(format!("malformed getLogs response: {e}")))
        })
        .await
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Convert an `eth_getBlockByNumber` result object to a [`BlockHeader`].
pub fn block_from_json(v: &Value) -> Option<BlockHeader> {
    Some(BlockHeader {
        number: parse_hex_u64(v["number"].as_str()?),
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?) as i64,
    })
}

/// Metric label for an RPC failure.
fn rpc_error_type(err: &IndexerError) -> &'static str {
    match err {
        IndexerError::Rpc(msg) => {
            if msg.contains("429") {
                "rate_limit"
            } else if msg.contains("timeout") || msg.contains("context deadline") {
                "timeout"
            } else if msg.contains("header not found") {
                "node_lag"
            } else {
                "unknown"
            }
        }
        IndexerError::RpcCode { code, .. } => match code {
            -32005 | -32016 => "rate_limit",
            -32001 | -32002 => "node_lag",
            -32603 => "internal",
            _ if RETRYABLE_RPC_CODES.contains(code) => "internal",
            _ => "unknown",
        },
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use transferindex_core::retry::RetryConfig;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        })
    }

    /// Transport scripted to fail N times before answering.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        answer: Value,
        error: fn() -> IndexerError,
    }

    #[async_trait]
    impl RpcTransport for FlakyTransport {
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, IndexerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(self.answer.clone())
            }
        }
    }

    #[tokio::test]
    async fn rate_limit_storm_absorbed() {
        // 429 on 4 of 5 attempts, then success.
        let gateway = HttpGateway::with_transport(FlakyTransport {
            failures: 4,
            calls: AtomicU32::new(0),
            answer: json!("0x10"),
            error: || IndexerError::Rpc("HTTP 429: too many requests".into()),
        })
        .with_policy(fast_policy());

        assert_eq!(gateway.latest_height().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces_last_error() {
        let gateway = HttpGateway::with_transport(FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            answer: Value::Null,
            error: || IndexerError::Rpc("HTTP 429: too many requests".into()),
        })
        .with_policy(fast_policy());

        let err = gateway.latest_height().await.unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn permanent_rpc_code_not_retried() {
        let gateway = HttpGateway::with_transport(FlakyTransport {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            answer: Value::Null,
            error: || IndexerError::RpcCode {
                code: -32000,
                message: "execution reverted".into(),
            },
        })
        .with_policy(fast_policy());

        let err = gateway.latest_height().await.unwrap_err();
        assert!(matches!(err, IndexerError::RpcCode { code: -32000, .. }));
    }

    #[tokio::test]
    async fn block_at_parses_header() {
        let gateway = HttpGateway::with_transport(FlakyTransport {
            failures: 0,
            calls: AtomicU32::new(0),
            answer: json!({
                "number": "0x64",
                "hash": "0xabc",
                "parentHash": "0xdef",
                "timestamp": "0x5f5e100",
            }),
            error: || IndexerError::Rpc("unused".into()),
        })
        .with_policy(fast_policy());

        let header = gateway.block_at(100).await.unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.hash, "0xabc");
        assert_eq!(header.parent_hash, "0xdef");
        assert_eq!(header.timestamp, 100_000_000);
    }

    #[tokio::test]
    async fn null_block_is_transient_node_lag() {
        let gateway = HttpGateway::with_transport(FlakyTransport {
            failures: 0,
            calls: AtomicU32::new(0),
            answer: Value::Null,
            error: || IndexerError::Rpc("unused".into()),
        })
        .with_policy(RetryPolicy::new(RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        }));

        let err = gateway.block_at(100).await.unwrap_err();
        // "header not found" keeps it retryable for the next run.
        assert!(err.is_retryable());
    }

    #[test]
    fn raw_log_parses_from_rpc_shape() {
        let raw = json!([{
            "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "topics": [TRANSFER_TOPIC0],
            "data": "0x01",
            "blockNumber": "0x12a05f200",
            "blockHash": "0xbeef",
            "transactionHash": "0xfeed",
            "logIndex": "0x5",
            "removed": false,
        }]);
        let logs: Vec<RawLog> = serde_json::from_value(raw).unwrap();
        assert_eq!(logs[0].block_number_u64(), 5_000_000_000);
        assert_eq!(logs[0].log_index_u32(), 5);
        assert!(!logs[0].is_removed());
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), 1);
        assert_eq!(parse_hex_u64("0xff"), 255);
        assert_eq!(parse_hex_u64("1234"), 0x1234);
    }

    #[test]
    fn error_type_labels() {
        assert_eq!(
            rpc_error_type(&IndexerError::Rpc("HTTP 429: nope".into())),
            "rate_limit"
        );
        assert_eq!(
            rpc_error_type(&IndexerError::Rpc("request timeout: deadline".into())),
            "timeout"
        );
        assert_eq!(
            rpc_error_type(&IndexerError::RpcCode { code: -32005, message: String::new() }),
            "rate_limit"
        );
        assert_eq!(
            rpc_error_type(&IndexerError::Rpc("weird".into())),
            "unknown"
        );
    }
}
