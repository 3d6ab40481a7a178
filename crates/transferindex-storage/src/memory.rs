//! In-memory storage backend.
//!
//! Mirrors the PostgreSQL backend's semantics exactly (canonical view,
//! soft-delete marks, conflict-revive) so the engine's scenario tests can run
//! against it. All data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use transferindex_core::error::IndexerError;

use crate::{BlockRow, NewBlock, NewTransfer, Store, TransferRow};

/// In-memory [`Store`] for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    // Keyed like the database: blocks by hash, transfers by (tx_hash, log_index).
    blocks: Mutex<HashMap<String, BlockRow>>,
    transfers: Mutex<HashMap<(String, i32), TransferRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All block rows, canonical and reorged, ordered by number.
    pub fn all_blocks(&self) -> Vec<BlockRow> {
        let mut rows: Vec<_> = self.blocks.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|b| (b.number, b.hash.clone()));
        rows
    }

    /// Canonical (non-reorged) block rows ordered by number.
    pub fn canonical_blocks(&self) -> Vec<BlockRow> {
        self.all_blocks()
            .into_iter()
            .filter(|b| b.reorged_at.is_none())
            .collect()
    }

    /// All transfer rows ordered by (block, log index).
    pub fn all_transfers(&self) -> Vec<TransferRow> {
        let mut rows: Vec<_> = self.transfers.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|t| (t.block_number, t.log_index, t.tx_hash.clone()));
        rows
    }

    /// Canonical transfer rows ordered by (block, log index).
    pub fn canonical_transfers(&self) -> Vec<TransferRow> {
        self.all_transfers()
            .into_iter()
            .filter(|t| t.reorged_at.is_none())
            .collect()
    }

    fn canonical_at(blocks: &HashMap<String, BlockRow>, number: i64) -> Option<BlockRow> {
        blocks
            .values()
            .find(|b| b.number == number && b.reorged_at.is_none())
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_block(&self, block: &NewBlock) -> Result<(), IndexerError> {
        let mut blocks = self.blocks.lock().unwrap();
        let revive = match blocks.get(&block.hash) {
            Some(row) if row.reorged_at.is_some() => true,
            Some(_) => return Ok(()),
            None => false,
        };
        if Self::canonical_at(&blocks, block.number).is_some() {
            return Err(IndexerError::ConstraintViolation(format!(
                "duplicate canonical block at height {}",
                block.number
            )));
        }
        if revive {
            // A fork that won again; its height was vacated above.
            if let Some(row) = blocks.get_mut(&block.hash) {
                row.reorged_at = None;
                row.processed_at = None;
            }
            return Ok(());
        }
        blocks.insert(
            block.hash.clone(),
            BlockRow {
                number: block.number,
                hash: block.hash.clone(),
                parent_hash: block.parent_hash.clone(),
                timestamp: block.timestamp,
                processed_at: None,
                finalized_at: None,
                reorged_at: None,
            },
        );
        Ok(())
    }

    async fn save_transfers_batch(&self, transfers: &[NewTransfer]) -> Result<(), IndexerError> {
        let mut map = self.transfers.lock().unwrap();
        for t in transfers {
            let key = (t.tx_hash.clone(), t.log_index);
            match map.get_mut(&key) {
                Some(existing) if existing.reorged_at.is_some() => {
                    existing.block_number = t.block_number;
                    existing.reorged_at = None;
                }
                Some(_) => {}
                None => {
                    map.insert(
                        key,
                        TransferRow {
                            tx_hash: t.tx_hash.clone(),
                            log_index: t.log_index,
                            block_number: t.block_number,
                            from_address: t.from_address.clone(),
                            to_address: t.to_address.clone(),
                            value: t.value.clone(),
                            token_address: t.token_address.clone(),
                            reorged_at: None,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn mark_block_processed(&self, number: i64) -> Result<(), IndexerError> {
        let mut blocks = self.blocks.lock().unwrap();
        if let Some(row) = blocks
            .values_mut()
            .find(|b| b.number == number && b.reorged_at.is_none())
        {
            if row.processed_at.is_none() {
                row.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn get_block(&self, number: i64) -> Result<BlockRow, IndexerError> {
        let blocks = self.blocks.lock().unwrap();
        Self::canonical_at(&blocks, number).ok_or(IndexerError::BlockNotFound)
    }

    async fn get_latest_processed_block_number(&self) -> Result<i64, IndexerError> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .values()
            .filter(|b| b.processed_at.is_some() && b.reorged_at.is_none())
            .map(|b| b.number)
            .max()
            .ok_or(IndexerError::BlockNotFound)
    }

    async fn mark_reorged_range(&self, from: i64) -> Result<(), IndexerError> {
        let now = Utc::now();
        let mut blocks = self.blocks.lock().unwrap();
        let mut transfers = self.transfers.lock().unwrap();
        for row in blocks.values_mut() {
            if row.number > from && row.reorged_at.is_none() {
                row.reorged_at = Some(now);
            }
        }
        for row in transfers.values_mut() {
            if row.block_number > from && row.reorged_at.is_none() {
                row.reorged_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_finalized_up_to(&self, number: i64) -> Result<(), IndexerError> {
        let now = Utc::now();
        let mut blocks = self.blocks.lock().unwrap();
        for row in blocks.values_mut() {
            if row.number <= number && row.finalized_at.is_none() && row.reorged_at.is_none() {
                row.finalized_at = Some(now);
            }
        }
        Ok(())
    }

    async fn delete_range(&self, from: i64) -> Result<(), IndexerError> {
        self.transfers
            .lock()
            .unwrap()
            .retain(|_, t| t.block_number <= from);
        self.blocks.lock().unwrap().retain(|_, b| b.number <= from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: i64, hash: &str, parent: &str) -> NewBlock {
        NewBlock {
            number,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: Utc::now(),
        }
    }

    fn transfer(tx: &str, idx: i32, block_number: i64) -> NewTransfer {
        NewTransfer {
            tx_hash: tx.into(),
            log_index: idx,
            block_number,
            from_address: "0xfrom".into(),
            to_address: "0xto".into(),
            value: "1000".into(),
            token_address: "0xtoken".into(),
        }
    }

    #[tokio::test]
    async fn save_block_replay_is_noop() {
        let store = MemoryStore::new();
        store.save_block(&block(100, "0xa", "0x9")).await.unwrap();
        store.save_block(&block(100, "0xa", "0x9")).await.unwrap();
        assert_eq!(store.all_blocks().len(), 1);
    }

    #[tokio::test]
    async fn second_canonical_row_at_height_is_constraint_violation() {
        let store = MemoryStore::new();
        store.save_block(&block(100, "0xa", "0x9")).await.unwrap();
        let err = store.save_block(&block(100, "0xb", "0x9")).await.unwrap_err();
        assert!(matches!(err, IndexerError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn cursor_tracks_processed_canonical_max() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_latest_processed_block_number().await,
            Err(IndexerError::BlockNotFound)
        ));

        for n in 100..=102 {
            store
                .save_block(&block(n, &format!("0xh{n}"), &format!("0xh{}", n - 1)))
                .await
                .unwrap();
            store.mark_block_processed(n).await.unwrap();
        }
        assert_eq!(store.get_latest_processed_block_number().await.unwrap(), 102);

        store.mark_reorged_range(100).await.unwrap();
        assert_eq!(store.get_latest_processed_block_number().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn reorg_marks_blocks_and_transfers() {
        let store = MemoryStore::new();
        for n in 100..=103 {
            store
                .save_block(&block(n, &format!("0xh{n}"), &format!("0xh{}", n - 1)))
                .await
                .unwrap();
        }
        store
            .save_transfers_batch(&[transfer("0xt1", 0, 101), transfer("0xt2", 0, 103)])
            .await
            .unwrap();

        store.mark_reorged_range(101).await.unwrap();

        assert_eq!(store.canonical_blocks().len(), 2); // 100, 101
        assert_eq!(store.canonical_transfers().len(), 1); // 0xt1 at 101
        assert!(matches!(
            store.get_block(102).await,
            Err(IndexerError::BlockNotFound)
        ));
    }

    #[tokio::test]
    async fn reinsert_after_reorg_takes_new_hash() {
        let store = MemoryStore::new();
        store.save_block(&block(110, "0xold", "0xh109")).await.unwrap();
        store.mark_reorged_range(109).await.unwrap();
        store.save_block(&block(110, "0xnew", "0xh109")).await.unwrap();

        let row = store.get_block(110).await.unwrap();
        assert_eq!(row.hash, "0xnew");
        assert_eq!(store.all_blocks().len(), 2, "reorged row is kept for audit");
    }

    #[tokio::test]
    async fn reorged_transfer_revived_by_reinsert() {
        let store = MemoryStore::new();
        store.save_transfers_batch(&[transfer("0xt1", 0, 110)]).await.unwrap();
        store.mark_reorged_range(109).await.unwrap();
        assert!(store.canonical_transfers().is_empty());

        // Winning fork re-included the same transaction at a new height.
        store.save_transfers_batch(&[transfer("0xt1", 0, 111)]).await.unwrap();
        let rows = store.canonical_transfers();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].block_number, 111);

        // Replay is a no-op.
        store.save_transfers_batch(&[transfer("0xt1", 0, 111)]).await.unwrap();
        assert_eq!(store.all_transfers().len(), 1);
    }

    #[tokio::test]
    async fn finalize_is_monotonic_and_skips_reorged() {
        let store = MemoryStore::new();
        for n in 1..=5 {
            store
                .save_block(&block(n, &format!("0xh{n}"), &format!("0xh{}", n - 1)))
                .await
                .unwrap();
        }
        store.mark_reorged_range(4).await.unwrap();
        store.mark_finalized_up_to(5).await.unwrap();

        for row in store.all_blocks() {
            if row.reorged_at.is_some() {
                assert!(row.finalized_at.is_none(), "reorged block {} finalized", row.number);
            } else {
                assert!(row.finalized_at.is_some());
            }
        }

        // A second pass never clears or re-stamps.
        let before = store.all_blocks();
        store.mark_finalized_up_to(5).await.unwrap();
        assert_eq!(before, store.all_blocks());
    }

    #[tokio::test]
    async fn delete_range_hard_deletes() {
        let store = MemoryStore::new();
        for n in 1..=4 {
            store
                .save_block(&block(n, &format!("0xh{n}"), &format!("0xh{}", n - 1)))
                .await
                .unwrap();
        }
        store.save_transfers_batch(&[transfer("0xt1", 0, 3)]).await.unwrap();

        store.delete_range(2).await.unwrap();
        assert_eq!(store.all_blocks().len(), 2);
        assert!(store.all_transfers().is_empty());
    }
}
