//! The ingestion loop.
//!
//! Strictly sequential per-height progression: for each height, verify
//! parent-hash continuity against the previously stored block, persist the
//! block, its decoded transfers, and the processed mark, in that order, then
//! advance the cursor. On a continuity break, locate the common ancestor,
//! soft-delete the tail above it, and resume from the ancestor.
//!
//! Every write is idempotent, and the cursor is derived from `processed_at`,
//! so a crash mid-height leaves the height replayable: restarting at
//! `last_processed + 1` is always safe.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::DateTime;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use transferindex_core::decode::decode_transfer;
use transferindex_core::error::IndexerError;
use transferindex_core::types::BlockHeader;
use transferindex_evm::{ChainGateway, RawLog};
use transferindex_storage::{NewBlock, NewTransfer, Store};

use crate::ancestor::find_common_ancestor;
use crate::metrics::{
    BLOCKS_PROCESSED_TOTAL, BLOCK_PROCESSING_DURATION_SECONDS, CURRENT_BLOCK_HEIGHT,
    REORG_DETECTED_TOTAL,
};

/// Bound on each gateway/store call once a height's write sequence has begun,
/// so graceful shutdown cannot tear a block half-written.
const OP_DEADLINE: Duration = Duration::from_secs(60);

/// A fatal run error, carrying the last height whose processed mark was
/// durably written. Restarting at `last_processed + 1` is always safe.
#[derive(Debug, Error)]
#[error("indexing halted after block {last_processed}: {source}")]
pub struct RunError {
    pub last_processed: i64,
    #[source]
    pub source: IndexerError,
}

/// The sequential block indexer.
pub struct Indexer<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<G: ChainGateway, S: Store> Indexer<G, S> {
    pub fn new(gateway: Arc<G>, store: Arc<S>, cancel: CancellationToken) -> Self {
        Self {
            gateway,
            store,
            cancel,
        }
    }

    /// Index heights `start..=end` and return the last fully processed height.
    ///
    /// Cancellation is observed at the top of each height and is not an
    /// error: the cursor as of the last completed height is returned.
    pub async fn run(&self, start: i64, end: i64) -> Result<i64, RunError> {
        let mut last_processed = start - 1;
        let mut num = start;

        while num <= end {
            if self.cancel.is_cancelled() {
                tracing::info!(last_processed, "cancelled, stopping at top of loop");
                return Ok(last_processed);
            }
            let started = Instant::now();

            // The previous height is absent exactly once: before the first
            // block this deployment ever wrote.
            let previous = match deadline("get_block", self.store.get_block(num - 1)).await {
                Ok(row) => Some(row),
                Err(IndexerError::BlockNotFound) => None,
                Err(e) => return Err(self.fatal(last_processed, num, e)),
            };

            let block = match deadline("block_at", self.gateway.block_at(num as u64)).await {
                Ok(b) => b,
                Err(e) => return Err(self.fatal(last_processed, num, e)),
            };

            if let Some(previous) = &previous {
                if previous.hash != block.parent_hash {
                    tracing::warn!(
                        block = num,
                        stored_hash = %previous.hash,
                        parent_hash = %block.parent_hash,
                        "reorg detected"
                    );
                    metrics::counter!(REORG_DETECTED_TOTAL).increment(1);

                    let ancestor = match find_common_ancestor(
                        self.gateway.as_ref(),
                        self.store.as_ref(),
                        num - 1,
                    )
                    .await
                    {
                        Ok(a) => a,
                        Err(e) => return Err(self.fatal(last_processed, num, e)),
                    };
                    tracing::info!(ancestor, "found common ancestor");

                    if let Err(e) =
                        deadline("mark_reorged_range", self.store.mark_reorged_range(ancestor))
                            .await
                    {
                        return Err(self.fatal(last_processed, num, e));
                    }
                    tracing::info!(ancestor, "rolled back data above ancestor");

                    // Resume from the first height after the ancestor.
                    last_processed = ancestor;
                    num = ancestor + 1;
                    continue;
                }
            }

            let write = self.write_height(num, &block).await;
            if let Err(e) = write {
                return Err(self.fatal(last_processed, num, e));
            }

            last_processed = num;
            metrics::counter!(BLOCKS_PROCESSED_TOTAL).increment(1);
            metrics::gauge!(CURRENT_BLOCK_HEIGHT).set(num as f64);
            metrics::histogram!(BLOCK_PROCESSING_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            num += 1;
        }

        Ok(last_processed)
    }

    /// The ordered write sequence for one height:
    /// block → transfers → processed mark.
    async fn write_height(&self, num: i64, block: &BlockHeader) -> Result<(), IndexerError> {
        let new_block = NewBlock {
            number: num,
            hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            timestamp: DateTime::from_timestamp(block.timestamp, 0).unwrap_or_default(),
        };
        deadline("save_block", self.store.save_block(&new_block)).await?;

        let logs = deadline(
            "transfers_in_range",
            self.gateway.transfers_in_range(num as u64, num as u64),
        )
        .await?;
        let transfers = decode_logs(num, &logs);

        deadline(
            "save_transfers_batch",
            self.store.save_transfers_batch(&transfers),
        )
        .await?;
        deadline("mark_block_processed", self.store.mark_block_processed(num)).await?;

        tracing::info!(block = num, transfers = transfers.len(), "indexed block");
        Ok(())
    }

    fn fatal(&self, last_processed: i64, num: i64, source: IndexerError) -> RunError {
        tracing::error!(block = num, error = %source, "indexing failed");
        RunError {
            last_processed,
            source,
        }
    }
}

/// Decode Transfer logs into insert payloads, silently skipping what does not
/// decode (the 4-topic ERC-721 shape and malformed logs) and anything the
/// node flagged as removed.
fn decode_logs(num: i64, logs: &[RawLog]) -> Vec<NewTransfer> {
    logs.iter()
        .filter(|log| !log.is_removed())
        .filter_map(|log| {
            let decoded = decode_transfer(&log.topics, &log.data)?;
            Some(NewTransfer {
                tx_hash: log.tx_hash.clone(),
                log_index: log.log_index_u32() as i32,
                block_number: num,
                from_address: decoded.from.to_string(),
                to_address: decoded.to.to_string(),
                value: decoded.value.to_string(),
                token_address: log.address.clone(),
            })
        })
        .collect()
}

/// Run one pipeline operation under the per-iteration deadline.
///
/// The deadline derives from a plain timer, not the cancellation token, so an
/// in-flight height always completes its writes during shutdown.
async fn deadline<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, IndexerError>>,
) -> Result<T, IndexerError> {
    match tokio::time::timeout(OP_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::Deadline {
            op,
            secs: OP_DEADLINE.as_secs(),
        }),
    }
}
