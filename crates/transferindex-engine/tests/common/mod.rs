//! Scripted chain for scenario tests.
//!
//! Hashes are deterministic per (seed, height) so forks are easy to spell:
//! `fork_from` rewrites a tail under a new seed, linking the fork's first
//! block to the surviving parent.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use transferindex_core::decode::TRANSFER_TOPIC0;
use transferindex_core::error::IndexerError;
use transferindex_core::types::BlockHeader;
use transferindex_evm::{ChainGateway, RawLog};

pub struct MockChain {
    inner: Mutex<Inner>,
}

struct Inner {
    tip: u64,
    tip_error: bool,
    blocks: HashMap<u64, BlockHeader>,
    logs: HashMap<u64, Vec<RawLog>>,
}

impl MockChain {
    pub fn new(tip: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tip,
                tip_error: false,
                blocks: HashMap::new(),
                logs: HashMap::new(),
            }),
        }
    }

    pub fn hash_for(seed: &str, number: u64) -> String {
        format!("0x{seed}{number}")
    }

    /// Append a linear run of blocks `from..=to` under `seed`, linking the
    /// first to whatever already sits at `from - 1`.
    pub fn extend_linear(&self, from: u64, to: u64, seed: &str) {
        self.fork_from(from, to, seed);
    }

    /// Replace blocks `from..=to` with a fork under `seed`. The fork's first
    /// block keeps the surviving chain's block at `from - 1` as its parent.
    pub fn fork_from(&self, from: u64, to: u64, seed: &str) {
        let mut inner = self.inner.lock().unwrap();
        let mut parent = inner
            .blocks
            .get(&from.wrapping_sub(1))
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| Self::hash_for(seed, from.wrapping_sub(1)));
        for number in from..=to {
            let hash = Self::hash_for(seed, number);
            inner.blocks.insert(
                number,
                BlockHeader {
                    number,
                    hash: hash.clone(),
                    parent_hash: parent,
                    timestamp: (number * 12) as i64,
                },
            );
            parent = hash;
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.inner.lock().unwrap().tip = tip;
    }

    pub fn set_tip_error(&self, fail: bool) {
        self.inner.lock().unwrap().tip_error = fail;
    }

    /// Attach a well-formed Transfer log to `block`.
    pub fn add_transfer_log(&self, block: u64, tx_hash: &str, log_index: u64, value: u64) {
        self.add_raw_log(
            block,
            transfer_log(block, tx_hash, log_index, value, &[
                TRANSFER_TOPIC0.to_string(),
                pad_address("1111111111111111111111111111111111111111"),
                pad_address("2222222222222222222222222222222222222222"),
            ]),
        );
    }

    /// Attach an ERC-721-shaped (4-topic) Transfer log to `block`.
    pub fn add_erc721_log(&self, block: u64, tx_hash: &str, log_index: u64) {
        self.add_raw_log(
            block,
            transfer_log(block, tx_hash, log_index, 0, &[
                TRANSFER_TOPIC0.to_string(),
                pad_address("1111111111111111111111111111111111111111"),
                pad_address("2222222222222222222222222222222222222222"),
                format!("0x{:064x}", 7u64),
            ]),
        );
    }

    pub fn add_raw_log(&self, block: u64, log: RawLog) {
        self.inner.lock().unwrap().logs.entry(block).or_default().push(log);
    }
}

pub fn pad_address(addr: &str) -> String {
    format!("0x{}{}", "0".repeat(24), addr)
}

fn transfer_log(block: u64, tx_hash: &str, log_index: u64, value: u64, topics: &[String]) -> RawLog {
    RawLog {
        address: "0xa0b86991c6218B36c1d19D4a2e9Eb0cE3606eB48".into(),
        topics: topics.to_vec(),
        data: format!("0x{value:064x}"),
        block_number: format!("0x{block:x}"),
        block_hash: format!("0xblock{block}"),
        tx_hash: tx_hash.into(),
        log_index: format!("0x{log_index:x}"),
        removed: None,
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn latest_height(&self) -> Result<u64, IndexerError> {
        let inner = self.inner.lock().unwrap();
        if inner.tip_error {
            return Err(IndexerError::Rpc("HTTP 504: gateway timeout".into()));
        }
        Ok(inner.tip)
    }

    async fn block_at(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| IndexerError::Rpc(format!("header not found: block {number}")))
    }

    async fn transfers_in_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for number in from..=to {
            if let Some(logs) = inner.logs.get(&number) {
                out.extend(logs.iter().cloned());
            }
        }
        Ok(out)
    }
}
