//! Background promotion of blocks past the safety depth.
//!
//! Runs concurrently with the indexer. The finalizer makes no assertions
//! about reorgs under `safe_depth` (that is the entire reason the depth
//! exists), and the store filters reorged rows out of the finalize mark, so a
//! reorged block can never become finalized.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use transferindex_evm::ChainGateway;
use transferindex_storage::Store;

use crate::metrics::{CHAIN_TIP_HEIGHT, FINALIZED_BLOCK_HEIGHT};

/// Periodic finalization task.
pub struct Finalizer<G, S> {
    gateway: Arc<G>,
    store: Arc<S>,
    cancel: CancellationToken,
    safe_depth: u64,
    tick: Duration,
    /// In-memory high-water mark; skips redundant store writes between ticks.
    last_finalized: i64,
}

impl<G: ChainGateway, S: Store> Finalizer<G, S> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        cancel: CancellationToken,
        safe_depth: u64,
        tick: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            cancel,
            safe_depth,
            tick,
            last_finalized: 0,
        }
    }

    /// Tick until cancelled.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(last_finalized = self.last_finalized, "finalizer stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }

    /// One finalization pass. Tip read failures are logged and skipped; the
    /// next tick tries again.
    pub async fn tick_once(&mut self) {
        let tip = match self.gateway.latest_height().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!(error = %e, "finalizer: failed to read chain tip");
                return;
            }
        };
        metrics::gauge!(CHAIN_TIP_HEIGHT).set(tip as f64);

        let finality = tip as i64 - self.safe_depth as i64;
        if finality <= 0 || finality <= self.last_finalized {
            return;
        }

        match self.store.mark_finalized_up_to(finality).await {
            Ok(()) => {
                tracing::debug!(finality, "finalized blocks up to height");
                metrics::gauge!(FINALIZED_BLOCK_HEIGHT).set(finality as f64);
                self.last_finalized = finality;
            }
            Err(e) => {
                tracing::warn!(finality, error = %e, "finalizer: mark failed, will retry next tick");
            }
        }
    }

    /// The current in-memory high-water mark.
    pub fn last_finalized(&self) -> i64 {
        self.last_finalized
    }
}
