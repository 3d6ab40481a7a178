//! transferindex-storage — idempotent persistence for blocks and transfers.
//!
//! The store exclusively owns record lifetimes; callers issue mutation
//! commands and never share in-memory state across components. Every
//! operation is safe to repeat with the same argument, so a crashed run can
//! always replay from `last_processed + 1`.
//!
//! Blocks are keyed by `hash`, with at most one *canonical* (non-reorged) row
//! per height. Canonical-view queries filter `reorged_at IS NULL`; reorgs
//! soft-delete by stamping `reorged_at`, never by removing rows. A separate
//! [`Store::delete_range`] exists as an operational tool and is not used by
//! the ingestion loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use transferindex_core::error::IndexerError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// A durable block record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    /// Set once all derived data for this block is written.
    pub processed_at: Option<DateTime<Utc>>,
    /// Set once the block has passed the safety depth. Never cleared.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Set when the block was logically invalidated by a reorg. Never cleared
    /// except by re-insertion of the same hash as canonical again.
    pub reorged_at: Option<DateTime<Utc>>,
}

/// Insert payload for a block.
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A durable transfer record, keyed by `(tx_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRow {
    pub tx_hash: String,
    pub log_index: i32,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: String,
    /// Decimal string; up to 256 bits (`NUMERIC(78,0)`).
    pub value: String,
    pub token_address: String,
    pub reorged_at: Option<DateTime<Utc>>,
}

/// Insert payload for a transfer.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub tx_hash: String,
    pub log_index: i32,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
    pub token_address: String,
}

/// Operations the ingestion and finalization pipeline consumes.
///
/// Implementations retry transient failures internally with the shared
/// classifier; integrity-constraint violations (SQLSTATE class 23) are
/// permanent: they indicate a logic bug, not a flaky backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a block; replaying an already-stored hash is a no-op success.
    /// Re-inserting a hash that was previously reorged revives it as
    /// canonical (its height must have been vacated by `mark_reorged_range`).
    async fn save_block(&self, block: &NewBlock) -> Result<(), IndexerError>;

    /// Bulk-insert transfers atomically. Empty input is a no-op success.
    /// A conflict on `(tx_hash, log_index)` is ignored unless the existing
    /// row is reorged, in which case it is revived under the new block.
    async fn save_transfers_batch(&self, transfers: &[NewTransfer]) -> Result<(), IndexerError>;

    /// Stamp `processed_at` on the canonical block at `number`. No-op if
    /// already stamped.
    async fn mark_block_processed(&self, number: i64) -> Result<(), IndexerError>;

    /// The canonical block at `number`, or [`IndexerError::BlockNotFound`].
    async fn get_block(&self, number: i64) -> Result<BlockRow, IndexerError>;

    /// The cursor: `max(number)` over processed, non-reorged blocks.
    /// [`IndexerError::BlockNotFound`] when no such row exists.
    async fn get_latest_processed_block_number(&self) -> Result<i64, IndexerError>;

    /// In a single transaction, stamp `reorged_at` on every block and every
    /// transfer above `from` that is not already reorged.
    async fn mark_reorged_range(&self, from: i64) -> Result<(), IndexerError>;

    /// Stamp `finalized_at` on every non-finalized, non-reorged block at or
    /// below `number`. Monotonic; reorged blocks are never finalized.
    async fn mark_finalized_up_to(&self, number: i64) -> Result<(), IndexerError>;

    /// Hard-delete every transfer and block above `from`, in a single
    /// transaction. Operational tool only; the ingestion loop soft-deletes.
    async fn delete_range(&self, from: i64) -> Result<(), IndexerError>;
}
