//! transferindex-evm — JSON-RPC transport and the retrying chain gateway.

pub mod client;
pub mod gateway;
pub mod request;

pub use client::HttpClient;
pub use gateway::{ChainGateway, HttpGateway, RawLog, RpcTransport, RPC_ERRORS_TOTAL};
