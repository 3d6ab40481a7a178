//! Common-ancestor search for reorg resolution.

use transferindex_core::error::IndexerError;
use transferindex_evm::ChainGateway;
use transferindex_storage::Store;

/// Cap on the backward walk. A reorg deeper than this needs human attention.
pub const MAX_REORG_DEPTH: u32 = 1000;

/// Walk backward from `start` comparing the stored hash at each height with
/// what the chain currently reports, and return the highest height where they
/// match.
///
/// `start` is the height the indexer *thought* was canonical but whose child
/// disagrees. Exact hash equality is the sole ancestor criterion. The walk is
/// over blocks we previously wrote, so a missing local row is fatal.
pub async fn find_common_ancestor<G, S>(
    gateway: &G,
    store: &S,
    start: i64,
) -> Result<i64, IndexerError>
where
    G: ChainGateway + ?Sized,
    S: Store + ?Sized,
{
    let mut current = start;
    let mut depth = 0u32;

    while current >= 0 {
        if depth > MAX_REORG_DEPTH {
            return Err(IndexerError::ReorgDepthExceeded { limit: MAX_REORG_DEPTH });
        }

        let canonical = gateway.block_at(current as u64).await?;
        let local = store.get_block(current).await.map_err(|e| {
            if matches!(e, IndexerError::BlockNotFound) {
                tracing::error!(
                    block = current,
                    "local block missing during ancestor walk, store is inconsistent"
                );
            }
            e
        })?;

        if canonical.hash == local.hash {
            return Ok(current);
        }

        tracing::debug!(
            block = current,
            canonical = %canonical.hash,
            local = %local.hash,
            "hash mismatch, walking back"
        );
        current -= 1;
        depth += 1;
    }

    Err(IndexerError::NoCommonAncestor)
}
