//! Error types for the indexing pipeline.
//!
//! The pipeline distinguishes *transient* failures (network hiccups, node lag,
//! rate limits) from *permanent* ones (constraint violations, missing rows,
//! unresolvable reorgs). Transient errors are absorbed by the retry layer;
//! permanent errors abort the current operation and surface to the caller.

use thiserror::Error;

/// Substrings that mark a transport error as transient.
const RETRYABLE_FRAGMENTS: &[&str] = &[
    "timeout",
    "context deadline",
    "429",
    "504",
    "header not found",
    "no response",
    "connection reset by peer",
];

/// JSON-RPC error codes that are worth retrying.
///
/// -32001 resource not found (node lag), -32002 resource unavailable,
/// -32005 rate limit, -32016 over rate limit, -32603 internal error.
pub const RETRYABLE_RPC_CODES: &[i64] = &[-32001, -32002, -32005, -32016, -32603];

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Transport-level RPC failure (HTTP error, malformed response, ...).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    RpcCode { code: i64, message: String },

    /// Storage failure that is not a constraint violation.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLSTATE class 23: duplicate key under a different identity, broken
    /// foreign key. Indicates a logic bug; never retried.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Sentinel: the requested block row does not exist in the canonical view.
    /// Signals "cursor empty" at startup and "first block" inside the loop;
    /// an invariant violation inside the ancestor walk.
    #[error("block not found")]
    BlockNotFound,

    /// The ancestor walk did not converge within the safety cap.
    #[error("reorg depth exceeded safe limit of {limit} blocks")]
    ReorgDepthExceeded { limit: u32 },

    /// The ancestor walk reached below genesis without a hash match.
    #[error("no common ancestor found down to block 0")]
    NoCommonAncestor,

    /// An operation exceeded its per-iteration deadline.
    #[error("{op} exceeded {secs}s deadline")]
    Deadline { op: &'static str, secs: u64 },

    /// Invalid or missing configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns `true` if the error is transient and the operation may be
    /// retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc(msg) | Self::Storage(msg) => is_retryable_message(msg),
            Self::RpcCode { code, message } => {
                RETRYABLE_RPC_CODES.contains(code) || is_retryable_message(message)
            }
            _ => false,
        }
    }
}

/// Substring classification of a raw error message.
pub fn is_retryable_message(msg: &str) -> bool {
    RETRYABLE_FRAGMENTS.iter().any(|f| msg.contains(f))
}
