//! transferindex-engine — the ingestion + reorg-resolution + finalization
//! pipeline.
//!
//! ```text
//! Driver → Indexer ──► ChainGateway (pull)
//!             │  ▲
//!             │  └── find_common_ancestor (on continuity break)
//!             ▼
//!           Store ◄── Finalizer (concurrent, depth-gated)
//! ```
//!
//! The indexer and the finalizer share only the store; correctness between
//! them rests on the store's per-operation atomicity and the safety depth, not
//! on in-process locks.

pub mod ancestor;
pub mod driver;
pub mod finalizer;
pub mod indexer;
pub mod metrics;

pub use ancestor::find_common_ancestor;
pub use driver::{Driver, DriverConfig};
pub use finalizer::Finalizer;
pub use indexer::{Indexer, RunError};
