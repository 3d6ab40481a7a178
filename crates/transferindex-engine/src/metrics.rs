//! Metric names emitted by the pipeline.

use transferindex_evm::RPC_ERRORS_TOTAL;

/// Counter: blocks fully processed by the indexer.
pub const BLOCKS_PROCESSED_TOTAL: &str = "blocks_processed_total";

/// Gauge: the height the indexer has processed up to.
pub const CURRENT_BLOCK_HEIGHT: &str = "current_block_height";

/// Gauge: the latest height observed at the chain tip.
pub const CHAIN_TIP_HEIGHT: &str = "chain_tip_height";

/// Counter: chain re-organizations detected.
pub const REORG_DETECTED_TOTAL: &str = "reorg_detected_total";

/// Gauge: the height the finalizer has promoted up to.
pub const FINALIZED_BLOCK_HEIGHT: &str = "finalized_block_height";

/// Histogram: per-block processing duration in seconds.
pub const BLOCK_PROCESSING_DURATION_SECONDS: &str = "block_processing_duration_seconds";

/// Register descriptions with the installed recorder. Call once at startup if
/// an observer like Prometheus is wired.
pub fn describe() {
    metrics::describe_counter!(
        BLOCKS_PROCESSED_TOTAL,
        "Total number of blocks successfully processed by the indexer"
    );
    metrics::describe_gauge!(
        CURRENT_BLOCK_HEIGHT,
        "The current block height the indexer has processed up to"
    );
    metrics::describe_gauge!(
        CHAIN_TIP_HEIGHT,
        "The latest block height observed on the blockchain tip"
    );
    metrics::describe_counter!(
        RPC_ERRORS_TOTAL,
        "Total number of RPC errors encountered, by type"
    );
    metrics::describe_counter!(
        REORG_DETECTED_TOTAL,
        "Total number of chain re-organizations detected"
    );
    metrics::describe_gauge!(
        FINALIZED_BLOCK_HEIGHT,
        "The block height the finalizer has promoted up to"
    );
    metrics::describe_histogram!(
        BLOCK_PROCESSING_DURATION_SECONDS,
        "Histogram of block processing durations in seconds"
    );
}
