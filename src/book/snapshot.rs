//! Versioned, deterministic snapshot encoding for [`super::OrderBook`].
//!
//! Serialization follows spec.md §6: `version:u8, offset:u64,
//! pair, aggregation, bid_count:u32, bid_entries[], ask_count:u32,
//! ask_entries[], lastTrade?`. `bincode` gives us a fixed, deterministic
//! little-endian encoding of that same field list without hand-rolling a
//! byte-level codec.

use crate::domain::{AssetPair, LimitOrder, Trade};
use crate::error::MatcherError;
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotOrder {
    pub order: crate::domain::Order,
    pub amount_remaining: u64,
    pub fee_remaining: u64,
}

impl From<&LimitOrder> for SnapshotOrder {
    fn from(lo: &LimitOrder) -> Self {
        Self {
            order: lo.order.clone(),
            amount_remaining: lo.amount_remaining,
            fee_remaining: lo.fee_remaining,
        }
    }
}

impl From<SnapshotOrder> for LimitOrder {
    fn from(s: SnapshotOrder) -> Self {
        LimitOrder {
            order: s.order,
            amount_remaining: s.amount_remaining,
            fee_remaining: s.fee_remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u8,
    pub pair: AssetPair,
    pub offset: u64,
    pub aggregation: crate::book::rules::TickSize,
    pub bids: Vec<SnapshotOrder>,
    pub asks: Vec<SnapshotOrder>,
    pub last_trade: Option<Trade>,
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>, MatcherError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MatcherError> {
        let snap: Snapshot = bincode::deserialize(bytes)?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(MatcherError::InternalInvariant(format!(
                "unsupported snapshot version {}",
                snap.version
            )));
        }
        Ok(snap)
    }
}
