//! The price-time-priority order book: the core matching algorithm.
//!
//! Grounded on `backtest_v2/matching.rs`'s `LimitOrderBook`: bids and asks
//! kept in `BTreeMap<price, PriceLevel>`, a two-phase collect/apply split so
//! a match never needs two live mutable borrows into the same map at once.
//! Replaces the teacher's float-tick prices with the spec's integer,
//! price-constant-normalized `u64` prices, and adds tick-size bucket
//! aggregation and rule-transition re-aggregation, which the teacher's
//! simulator doesn't model.

pub mod rules;
pub mod snapshot;

use crate::domain::{LimitOrder, MarketStatus, Order, OrderId, OrderStatus, Side, Trade};
use crate::error::MatcherError;
use rules::{MatchingRules, TickSize};
use std::collections::{BTreeMap, VecDeque};

/// One resting maker fill produced by a match, alongside the taker fill it
/// pairs with. `buy_delta == sell_delta == amount` for every element,
/// preserving fill conservation (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct Fill {
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub price: u64,
    pub amount: u64,
    pub taker_fee: u64,
    pub maker_fee: u64,
    pub maker_status: OrderStatus,
}

/// Outcome of applying one incoming order to the book.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub fills: Vec<Fill>,
    pub taker_status: Option<OrderStatus>,
    pub rested: bool,
}

struct PriceLevel {
    orders: VecDeque<LimitOrder>,
}

impl PriceLevel {
    fn new() -> Self {
        Self { orders: VecDeque::new() }
    }

    /// Inserts maintaining `(timestamp, orderId)` priority within the
    /// bucket (spec.md §4.3 point 4): normally this is the back of the
    /// queue, but replay can interleave events out of timestamp order, so
    /// we find the correct slot explicitly rather than assume append-only.
    fn insert_priority_order(&mut self, order: LimitOrder) {
        let key = (order.order.timestamp, order.order.id);
        let pos = self
            .orders
            .iter()
            .position(|o| (o.order.timestamp, o.order.id) > key)
            .unwrap_or(self.orders.len());
        self.orders.insert(pos, order);
    }
}

/// Per-pair matching configuration. `min_fill_unit` is the venue's smallest
/// tradable increment for this pair; trades that would leave either side
/// with a sub-minimum, unfillable residual are rounded up to close that
/// side out completely instead (spec.md §4.3 point 6).
#[derive(Debug, Clone)]
pub struct BookConfig {
    pub rules: MatchingRules,
    pub min_fill_unit: u64,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self { rules: MatchingRules::disabled(), min_fill_unit: 1 }
    }
}

/// A single asset pair's live order book.
pub struct OrderBook {
    config: BookConfig,
    bids: BTreeMap<u64, PriceLevel>,
    asks: BTreeMap<u64, PriceLevel>,
    by_id: std::collections::HashMap<OrderId, Side>,
    last_trade: Option<Trade>,
    last_offset: Option<u64>,
}

impl OrderBook {
    pub fn new(config: BookConfig) -> Self {
        Self {
            config,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            by_id: std::collections::HashMap::new(),
            last_trade: None,
            last_offset: None,
        }
    }

    /// The offset of the last event applied to this book, or `None` if
    /// the book is fresh. Callers use this to decide whether a replayed
    /// event has already been applied (spec.md §5's idempotent-by-offset
    /// requirement).
    pub fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }

    pub fn market_status(&self) -> MarketStatus {
        MarketStatus {
            last_trade: self.last_trade,
            best_bid: self.bids.keys().next_back().copied(),
            best_ask: self.asks.keys().next().copied(),
            aggregation: self.tick_at(self.last_offset.map(|o| o + 1).unwrap_or(0)),
        }
    }

    fn tick_at(&self, offset: u64) -> TickSize {
        self.config.rules.effective_at(offset)
    }

    fn bucket_for(&self, side: Side, price: u64, offset: u64) -> u64 {
        let tick = self.tick_at(offset);
        match side {
            Side::Buy => tick.bid_bucket(price),
            Side::Sell => tick.ask_bucket(price),
        }
    }

    /// Applies a `PlaceOrder` event at `offset`, matching against the
    /// contra side and resting any unfilled remainder. Idempotent callers
    /// must check `offset > last_offset()` before calling (spec.md §5).
    pub fn apply_place(&mut self, order: Order, offset: u64, now: u64) -> Result<MatchOutcome, MatcherError> {
        self.reaggregate_if_boundary_crossed(offset);
        let mut incoming = LimitOrder::new(order);
        let side = incoming.order.side;
        let contra_side = side.opposite();
        let mut fills = Vec::new();

        loop {
            if incoming.is_exhausted() {
                break;
            }
            let best_bucket = match contra_side {
                Side::Buy => self.bids.keys().next_back().copied(),
                Side::Sell => self.asks.keys().next().copied(),
            };
            let Some(bucket_price) = best_bucket else { break };

            let crosses = match side {
                Side::Buy => bucket_price <= incoming.order.price,
                Side::Sell => bucket_price >= incoming.order.price,
            };
            if !crosses {
                break;
            }

            let contra_map = match contra_side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            let level = contra_map.get_mut(&bucket_price).expect("bucket indexed by key present");
            let Some(mut maker) = level.orders.pop_front() else {
                contra_map.remove(&bucket_price);
                continue;
            };

            let fill_amount = incoming.amount_remaining.min(maker.amount_remaining);
            let trade_price = maker.order.price;

            incoming.amount_remaining = incoming.amount_remaining.saturating_sub(fill_amount);
            maker.amount_remaining = maker.amount_remaining.saturating_sub(fill_amount);

            let taker_fee = prorated_fee(&incoming, fill_amount);
            let maker_fee = prorated_fee(&maker, fill_amount);
            incoming.fee_remaining = incoming.fee_remaining.saturating_sub(taker_fee);
            maker.fee_remaining = maker.fee_remaining.saturating_sub(maker_fee);

            // Whichever side the natural fill left with a sub-minimum,
            // unfillable residual is closed out in its own bookkeeping only
            // (spec.md:82) — the reported trade size above stays natural.
            close_out_dust_residual(&mut incoming, self.config.min_fill_unit);
            close_out_dust_residual(&mut maker, self.config.min_fill_unit);

            self.last_trade = Some(Trade { price: trade_price, amount: fill_amount, timestamp: now });

            let maker_status = if maker.is_exhausted() {
                OrderStatus::Filled { filled: maker.filled(), filled_fee: maker.order.matcher_fee - maker.fee_remaining }
            } else {
                OrderStatus::PartiallyFilled { filled: maker.filled(), filled_fee: maker.order.matcher_fee - maker.fee_remaining }
            };

            fills.push(Fill {
                taker_order_id: incoming.order.id,
                maker_order_id: maker.order.id,
                price: trade_price,
                amount: fill_amount,
                taker_fee,
                maker_fee,
                maker_status,
            });

            if maker.is_exhausted() {
                self.by_id.remove(&maker.order.id);
            } else {
                level.orders.push_front(maker);
            }
            if level.orders.is_empty() {
                contra_map.remove(&bucket_price);
            }
        }

        let taker_status = if incoming.is_exhausted() {
            Some(OrderStatus::Filled {
                filled: incoming.filled(),
                filled_fee: incoming.order.matcher_fee - incoming.fee_remaining,
            })
        } else if !fills.is_empty() {
            Some(OrderStatus::PartiallyFilled {
                filled: incoming.filled(),
                filled_fee: incoming.order.matcher_fee - incoming.fee_remaining,
            })
        } else {
            None
        };

        let rested = !incoming.is_exhausted();
        if rested {
            let bucket = self.bucket_for(side, incoming.order.price, offset);
            let own_map = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            self.by_id.insert(incoming.order.id, side);
            own_map.entry(bucket).or_insert_with(PriceLevel::new).insert_priority_order(incoming);
        }

        self.last_offset = Some(offset);
        Ok(MatchOutcome { fills, taker_status, rested })
    }

    /// Removes a resting order from the book, returning its terminal
    /// status. A no-op (returns `None`) if the order is unknown or already
    /// terminal, matching the idempotent-cancel requirement.
    pub fn apply_cancel(&mut self, order_id: OrderId, offset: u64) -> Option<OrderStatus> {
        self.last_offset = Some(offset);
        let side = self.by_id.remove(&order_id)?;
        let map = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let mut found = None;
        map.retain(|_, level| {
            if found.is_some() {
                return !level.orders.is_empty();
            }
            if let Some(pos) = level.orders.iter().position(|o| o.order.id == order_id) {
                let order = level.orders.remove(pos).expect("position just located");
                found = Some(OrderStatus::Cancelled {
                    filled: order.filled(),
                    filled_fee: order.order.matcher_fee - order.fee_remaining,
                });
            }
            !level.orders.is_empty()
        });
        found
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.by_id.contains_key(order_id)
    }

    pub fn snapshot(&self, pair: crate::domain::AssetPair) -> snapshot::Snapshot {
        let collect = |map: &BTreeMap<u64, PriceLevel>| {
            map.values()
                .flat_map(|level| level.orders.iter())
                .map(snapshot::SnapshotOrder::from)
                .collect::<Vec<_>>()
        };
        let offset = self.last_offset.unwrap_or(0);
        snapshot::Snapshot {
            version: snapshot::SNAPSHOT_VERSION,
            pair,
            offset,
            aggregation: self.tick_at(offset),
            bids: collect(&self.bids),
            asks: collect(&self.asks),
            last_trade: self.last_trade,
        }
    }

    pub fn restore(config: BookConfig, snap: snapshot::Snapshot) -> Self {
        let mut book = Self::new(config);
        book.last_offset = Some(snap.offset);
        book.last_trade = snap.last_trade;
        for s in snap.bids {
            let order: LimitOrder = s.into();
            let bucket = book.bucket_for(Side::Buy, order.order.price, snap.offset);
            book.by_id.insert(order.order.id, Side::Buy);
            book.bids.entry(bucket).or_insert_with(PriceLevel::new).insert_priority_order(order);
        }
        for s in snap.asks {
            let order: LimitOrder = s.into();
            let bucket = book.bucket_for(Side::Sell, order.order.price, snap.offset);
            book.by_id.insert(order.order.id, Side::Sell);
            book.asks.entry(bucket).or_insert_with(PriceLevel::new).insert_priority_order(order);
        }
        book
    }

    /// Re-buckets every resting order when a matching-rule boundary is
    /// crossed between the previous and new offset (spec.md §4.3): existing
    /// orders are never cancelled, only reprojected onto the new grid.
    fn reaggregate_if_boundary_crossed(&mut self, offset: u64) {
        let Some(prev) = self.last_offset else { return };
        if !self.config.rules.crosses_boundary(prev, offset) {
            return;
        }
        let mut rebucket = |map: &mut BTreeMap<u64, PriceLevel>, side: Side| {
            let mut all: Vec<LimitOrder> = std::mem::take(map)
                .into_values()
                .flat_map(|level| level.orders.into_iter())
                .collect();
            all.sort_by_key(|o| (o.order.timestamp, o.order.id));
            for order in all {
                let bucket = match side {
                    Side::Buy => self.config.rules.effective_at(offset).bid_bucket(order.order.price),
                    Side::Sell => self.config.rules.effective_at(offset).ask_bucket(order.order.price),
                };
                map.entry(bucket).or_insert_with(PriceLevel::new).orders.push_back(order);
            }
        };
        let mut bids = std::mem::take(&mut self.bids);
        rebucket(&mut bids, Side::Buy);
        self.bids = bids;
        let mut asks = std::mem::take(&mut self.asks);
        rebucket(&mut asks, Side::Sell);
        self.asks = asks;
    }
}

/// `ceil(matcherFee * executedAmount / orderAmount)`, clamped to what's left
/// of the order's fee budget (spec.md §4.3 point 7).
fn prorated_fee(order: &LimitOrder, executed_amount: u64) -> u64 {
    if order.order.amount == 0 {
        return 0;
    }
    let numerator = order.order.matcher_fee as u128 * executed_amount as u128;
    let denom = order.order.amount as u128;
    let raw = numerator.div_ceil(denom) as u64;
    raw.min(order.fee_remaining)
}

/// If a side's remaining amount after the natural fill is positive but
/// below `min_fill_unit`, that residual can never be filled, so it's
/// written off directly rather than left resting as dust (spec.md:82:
/// "close out the smaller order at its exact remaining amount ... the
/// other side absorbs the rounded difference into its remaining
/// amount"). Applies symmetrically to either side — whichever one ends up
/// larger after the natural fill is the one that can be left with dust.
fn close_out_dust_residual(order: &mut LimitOrder, min_fill_unit: u64) {
    if order.amount_remaining > 0 && order.amount_remaining < min_fill_unit {
        order.amount_remaining = 0;
        order.fee_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetId, AssetPair, OrderId, OrderVersion};
    use secp256k1::ecdsa::Signature;
    use secp256k1::PublicKey;

    fn test_pubkey() -> PublicKey {
        let secp = secp256k1::Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn mk_order(id: u8, side: Side, price: u64, amount: u64, fee: u64, ts: u64) -> Order {
        Order {
            id: OrderId([id; 32]),
            owner: test_pubkey(),
            pair: AssetPair::new(AssetId::issued_from_bytes(b"BTC"), AssetId::Native),
            side,
            amount,
            price,
            matcher_fee: fee,
            fee_asset: AssetId::Native,
            timestamp: ts,
            expiration: ts + 1_000_000,
            version: OrderVersion(3),
            signature: Signature::from_compact(&[0u8; 64]).unwrap(),
        }
    }

    #[test]
    fn simple_cross_fills_both_sides() {
        let mut book = OrderBook::new(BookConfig::default());
        book.apply_place(mk_order(1, Side::Sell, 100, 10, 3, 1), 1, 1).unwrap();
        let outcome = book.apply_place(mk_order(2, Side::Buy, 100, 10, 3, 2), 2, 2).unwrap();
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].amount, 10);
        assert_eq!(outcome.fills[0].price, 100);
        assert!(matches!(outcome.taker_status, Some(OrderStatus::Filled { .. })));
    }

    #[test]
    fn partial_fill_rests_remainder() {
        let mut book = OrderBook::new(BookConfig::default());
        book.apply_place(mk_order(1, Side::Sell, 100, 5, 3, 1), 1, 1).unwrap();
        let outcome = book.apply_place(mk_order(2, Side::Buy, 100, 10, 6, 2), 2, 2).unwrap();
        assert_eq!(outcome.fills[0].amount, 5);
        assert!(matches!(outcome.taker_status, Some(OrderStatus::PartiallyFilled { filled: 5, .. })));
        assert!(outcome.rested);
        assert_eq!(book.market_status().best_bid, Some(100));
    }

    #[test]
    fn tick_size_aggregation_crosses_by_bucket_at_maker_price() {
        let mut config = BookConfig::default();
        config.rules = MatchingRules::new(vec![(0, TickSize::Enabled(100))]);
        let mut book = OrderBook::new(config);
        book.apply_place(mk_order(1, Side::Sell, 205, 10, 0, 1), 1, 1).unwrap();
        book.apply_place(mk_order(2, Side::Sell, 250, 10, 0, 2), 2, 2).unwrap();
        let outcome = book.apply_place(mk_order(3, Side::Buy, 300, 15, 0, 3), 3, 3).unwrap();
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[0].amount, 10);
        assert_eq!(outcome.fills[0].price, 205);
        assert_eq!(outcome.fills[1].amount, 5);
        assert_eq!(outcome.fills[1].price, 250);
    }

    #[test]
    fn cancel_removes_resting_order() {
        let mut book = OrderBook::new(BookConfig::default());
        let order = mk_order(1, Side::Buy, 100, 10, 3, 1);
        let id = order.id;
        book.apply_place(order, 1, 1).unwrap();
        let status = book.apply_cancel(id, 2).unwrap();
        assert!(matches!(status, OrderStatus::Cancelled { filled: 0, .. }));
        assert!(!book.contains(&id));
        assert_eq!(book.market_status().best_bid, None);
    }

    #[test]
    fn fee_proration_is_ceiling_and_clamped() {
        let mut book = OrderBook::new(BookConfig::default());
        book.apply_place(mk_order(1, Side::Sell, 100, 10, 7, 1), 1, 1).unwrap();
        let outcome = book.apply_place(mk_order(2, Side::Buy, 100, 3, 7, 2), 2, 2).unwrap();
        // ceil(7 * 3 / 10) == 3
        assert_eq!(outcome.fills[0].taker_fee, 3);
        assert_eq!(outcome.fills[0].maker_fee, 3);
    }

    #[test]
    fn dust_residual_closes_maker_fully() {
        let mut config = BookConfig::default();
        config.min_fill_unit = 5;
        let mut book = OrderBook::new(config);
        book.apply_place(mk_order(1, Side::Sell, 100, 101, 0, 1), 1, 1).unwrap();
        let outcome = book.apply_place(mk_order(2, Side::Buy, 100, 100, 0, 2), 2, 2).unwrap();
        // The taker only ordered 100, so the trade is reported at 100 even
        // though the maker's leftover 1 unit (below min_fill_unit) is
        // written off rather than left resting.
        assert_eq!(outcome.fills[0].amount, 100);
        assert!(matches!(outcome.fills[0].maker_status, OrderStatus::Filled { .. }));
        assert!(matches!(outcome.taker_status, Some(OrderStatus::Filled { .. })));
    }

    #[test]
    fn dust_residual_closes_taker_fully_when_taker_is_larger_side() {
        let mut config = BookConfig::default();
        config.min_fill_unit = 5;
        let mut book = OrderBook::new(config);
        book.apply_place(mk_order(1, Side::Sell, 100, 100, 0, 1), 1, 1).unwrap();
        let outcome = book.apply_place(mk_order(2, Side::Buy, 100, 101, 0, 2), 2, 2).unwrap();
        // The maker only offered 100, so the trade is reported at 100; the
        // taker's leftover 1 unit is below min_fill_unit and is written off
        // instead of resting on the book as unfillable dust.
        assert_eq!(outcome.fills[0].amount, 100);
        assert!(matches!(outcome.fills[0].maker_status, OrderStatus::Filled { .. }));
        assert!(matches!(outcome.taker_status, Some(OrderStatus::Filled { .. })));
        assert!(!outcome.rested);
    }
}
