//! transferindex-core — foundation for the reorg-safe transfer indexer.
//!
//! # Architecture
//!
//! ```text
//! cli → engine::Driver → engine::Indexer
//!                            ├── evm::ChainGateway   (retrying JSON-RPC)
//!                            ├── storage::Store      (idempotent persistence)
//!                            ├── engine::Finalizer   (depth-based promotion)
//!                            └── core                (errors, retry, decode, config)
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{IndexerSettings, RdbSettings};
pub use decode::{decode_transfer, DecodedTransfer, TRANSFER_TOPIC0};
pub use error::IndexerError;
pub use retry::{retry, RetryConfig, RetryPolicy};
pub use types::BlockHeader;
