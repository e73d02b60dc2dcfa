//! Queue events and the market-status view derived from applying them.

use super::asset::AssetPair;
use super::order::{Order, OrderId};
use serde::{Deserialize, Serialize};

/// An address on the external blockchain, as seen by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A command appended to the EventQueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    PlaceOrder(Order),
    CancelOrder { order_id: OrderId, by: Address },
    OrderBookDeleted { pair: AssetPair },
}

impl QueueEvent {
    pub fn pair(&self) -> Option<AssetPair> {
        match self {
            QueueEvent::PlaceOrder(order) => Some(order.pair),
            QueueEvent::OrderBookDeleted { pair } => Some(*pair),
            QueueEvent::CancelOrder { .. } => None,
        }
    }
}

/// An event as stored in the queue, carrying its assigned offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEventWithMeta {
    pub offset: u64,
    pub timestamp: u64,
    pub event: QueueEvent,
}

/// A completed match between a taker and a maker order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trade {
    pub price: u64,
    pub amount: u64,
    pub timestamp: u64,
}

/// Best-of-book snapshot, recomputed after every event affecting a book.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarketStatus {
    pub last_trade: Option<Trade>,
    pub best_bid: Option<u64>,
    pub best_ask: Option<u64>,
    pub aggregation: crate::book::rules::TickSize,
}

/// A settlement transaction derived from one crossing (spec.md §4.8): the
/// matcher's record of what it matched, independent of whether the chain
/// ultimately confirms it. `id` is a content hash so retried broadcasts of
/// the same crossing are idempotent from the chain's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTransaction {
    pub id: [u8; 32],
    pub pair: AssetPair,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub price: u64,
    pub amount: u64,
    pub buy_matcher_fee: u64,
    pub sell_matcher_fee: u64,
    pub timestamp: u64,
}

impl ExchangeTransaction {
    /// Builds the settlement transaction for a fill, given which side of
    /// the pair the taker traded on (a fill's taker/maker ids map onto
    /// buy/sell depending on which side crossed).
    pub fn from_fill(
        pair: AssetPair,
        taker_side: super::order::Side,
        taker_order_id: OrderId,
        maker_order_id: OrderId,
        price: u64,
        amount: u64,
        taker_fee: u64,
        maker_fee: u64,
        timestamp: u64,
    ) -> Self {
        let (buy_order_id, sell_order_id, buy_matcher_fee, sell_matcher_fee) = match taker_side {
            super::order::Side::Buy => (taker_order_id, maker_order_id, taker_fee, maker_fee),
            super::order::Side::Sell => (maker_order_id, taker_order_id, maker_fee, taker_fee),
        };

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(buy_order_id.0);
        hasher.update(sell_order_id.0);
        hasher.update(price.to_be_bytes());
        hasher.update(amount.to_be_bytes());
        hasher.update(timestamp.to_be_bytes());
        let id: [u8; 32] = hasher.finalize().into();

        Self { id, pair, buy_order_id, sell_order_id, price, amount, buy_matcher_fee, sell_matcher_fee, timestamp }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }
}
