//! ERC-20 Transfer log decoding.
//!
//! ERC-721 emits the same `Transfer` signature with a fourth (indexed) topic,
//! so the two cannot be told apart by signature alone. The decoder accepts
//! exactly three topics and rejects everything else; callers skip rejected
//! logs silently.

use alloy_primitives::{hex, Address, U256};

/// ASCII event signature hashed into topic0.
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A decoded Transfer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Decode a raw log's topics and data payload into a Transfer.
///
/// Returns `None` unless the log has exactly 3 topics. `from` and `to` are the
/// right-most 20 bytes of topics 1 and 2; `value` is the big-endian unsigned
/// integer of the data payload. Payloads longer than 32 bytes cannot be a
/// `uint256` and are rejected.
pub fn decode_transfer(topics: &[String], data: &str) -> Option<DecodedTransfer> {
    if topics.len() != 3 {
        return None;
    }
    let from = address_from_topic(&topics[1])?;
    let to = address_from_topic(&topics[2])?;

    let payload = hex::decode(data.strip_prefix("0x").unwrap_or(data)).ok()?;
    if payload.len() > 32 {
        return None;
    }
    let value = U256::from_be_slice(&payload);

    Some(DecodedTransfer { from, to, value })
}

/// Extract the address packed into a 32-byte indexed topic.
fn address_from_topic(topic: &str) -> Option<Address> {
    let bytes = hex::decode(topic.strip_prefix("0x").unwrap_or(topic)).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(Address::from_slice(&bytes[12..]))
}
