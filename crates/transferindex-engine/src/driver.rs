//! One-shot and continuous-mode orchestration around the indexer.
//!
//! Computes each run's range from the cursor and the chain tip
//! (`[last_processed + 1, tip - ingestion_depth]`), runs the indexer, and in
//! continuous mode sleeps and repeats. Run errors are logged; continuous mode
//! keeps going because the idempotent writes make replay from
//! `last_processed + 1` safe.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use transferindex_evm::ChainGateway;
use transferindex_storage::Store;

use crate::indexer::Indexer;
use crate::metrics::CHAIN_TIP_HEIGHT;

pub struct DriverConfig {
    /// A run's upper bound is `tip - ingestion_depth`.
    pub ingestion_depth: u64,
    /// Keep polling after each bounded run.
    pub continuous: bool,
    /// Sleep between continuous-mode polls.
    pub poll_interval: Duration,
}

pub struct Driver<G, S> {
    gateway: Arc<G>,
    indexer: Indexer<G, S>,
    cancel: CancellationToken,
    config: DriverConfig,
}

impl<G: ChainGateway, S: Store> Driver<G, S> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        cancel: CancellationToken,
        config: DriverConfig,
    ) -> Self {
        Self {
            indexer: Indexer::new(gateway.clone(), store, cancel.clone()),
            gateway,
            cancel,
            config,
        }
    }

    /// Drive the indexer from `cursor` (the last processed height) until the
    /// bounded run completes (one-shot) or cancellation (continuous). Returns
    /// the final cursor.
    pub async fn run(&self, cursor: i64) -> i64 {
        let mut last_processed = cursor;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.gateway.latest_height().await {
                Ok(tip) => {
                    metrics::gauge!(CHAIN_TIP_HEIGHT).set(tip as f64);
                    let start = last_processed + 1;
                    let end = tip as i64 - self.config.ingestion_depth as i64;

                    if start <= end {
                        tracing::info!(start, end, tip, "starting indexing run");
                        match self.indexer.run(start, end).await {
                            Ok(done) => {
                                last_processed = done;
                                tracing::info!(
                                    last_processed,
                                    blocks = done - start + 1,
                                    "indexing run complete"
                                );
                            }
                            Err(err) => {
                                last_processed = err.last_processed;
                                tracing::error!(
                                    last_processed,
                                    error = %err.source,
                                    "indexing run stopped with error"
                                );
                            }
                        }
                    } else {
                        tracing::debug!(tip, last_processed, "no new confirmed blocks");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read chain tip");
                }
            }

            if !self.config.continuous {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        last_processed
    }
}
