//! The coordinator: owns the asset-pair registry, lazily spawns per-pair
//! and per-address actors, drives event-queue consumption, and gates the
//! HTTP surface until replay has caught the live book up to the queue's
//! tip (spec.md §5, §6, §9).
//!
//! The `Starting`/`Working` gate is grounded on `main.rs`'s
//! `DataSourceKillSwitch`: a small state machine threaded through startup
//! that downstream consumers check before trusting a data source is live.

use super::address_actor::AddressActorHandle;
use super::orderbook_actor::OrderBookActorHandle;
use crate::actors::{AddressActor, OrderBookActor};
use crate::book::MatchOutcome;
use crate::broadcaster::{BroadcastConfig, ExchangeTransactionBroadcaster};
use crate::chain::BlockchainContext;
use crate::domain::{
    Address, AssetPair, ExchangeTransaction, MarketStatus, Order, OrderId, OrderStatus, Side, QueueEvent,
    QueueEventWithMeta,
};
use crate::error::MatcherError;
use crate::queue::EventQueue;
use crate::store::{AssetPairRegistry, KvStore, OrderDb, OrderRecord};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherStatus {
    Starting,
    Working,
}

impl From<u8> for MatcherStatus {
    fn from(v: u8) -> Self {
        if v == 1 {
            MatcherStatus::Working
        } else {
            MatcherStatus::Starting
        }
    }
}

/// The live coordinator state, shared (read-mostly) across the HTTP layer
/// and the consumption loop via `Arc`.
pub struct MatcherActor {
    pairs: Arc<AssetPairRegistry>,
    order_books: DashMap<AssetPair, OrderBookActorHandle>,
    addresses: DashMap<Address, AddressActorHandle>,
    chain: Arc<dyn BlockchainContext>,
    order_db: Arc<OrderDb>,
    kv: KvStore,
    min_fill_unit: u64,
    snapshot_interval_default: u64,
    snapshot_intervals: std::collections::HashMap<AssetPair, u64>,
    status: AtomicU8,
    broadcaster: Arc<ExchangeTransactionBroadcaster>,
}

pub type MatcherHandle = Arc<MatcherActor>;

impl MatcherActor {
    pub fn new(
        pairs: Arc<AssetPairRegistry>,
        chain: Arc<dyn BlockchainContext>,
        order_db: Arc<OrderDb>,
        kv: KvStore,
        min_fill_unit: u64,
    ) -> MatcherHandle {
        Self::with_broadcast_config(
            pairs,
            chain,
            order_db,
            kv,
            min_fill_unit,
            1000,
            std::collections::HashMap::new(),
            BroadcastConfig::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_broadcast_config(
        pairs: Arc<AssetPairRegistry>,
        chain: Arc<dyn BlockchainContext>,
        order_db: Arc<OrderDb>,
        kv: KvStore,
        min_fill_unit: u64,
        snapshot_interval_default: u64,
        snapshot_intervals: std::collections::HashMap<AssetPair, u64>,
        broadcast_config: BroadcastConfig,
    ) -> MatcherHandle {
        let broadcaster = Arc::new(ExchangeTransactionBroadcaster::new(chain.clone(), broadcast_config));
        Arc::new(Self {
            pairs,
            order_books: DashMap::new(),
            addresses: DashMap::new(),
            chain,
            order_db,
            kv,
            min_fill_unit,
            snapshot_interval_default,
            snapshot_intervals,
            status: AtomicU8::new(0),
            broadcaster,
        })
    }

    fn snapshot_interval_for(&self, pair: &AssetPair) -> u64 {
        self.snapshot_intervals.get(pair).copied().unwrap_or(self.snapshot_interval_default)
    }

    pub fn status(&self) -> MatcherStatus {
        MatcherStatus::from(self.status.load(Ordering::Acquire))
    }

    fn set_working(&self) {
        self.status.store(1, Ordering::Release);
    }

    fn get_or_spawn_book(&self, pair: AssetPair) -> OrderBookActorHandle {
        if let Some(handle) = self.order_books.get(&pair) {
            return handle.clone();
        }
        let rules = self.pairs.rules_for(&pair);
        let interval = self.snapshot_interval_for(&pair);
        let (handle, _restored_offset) = OrderBookActor::spawn(pair, rules, self.min_fill_unit, self.kv.clone(), interval);
        self.order_books.entry(pair).or_insert(handle).clone()
    }

    fn get_or_spawn_address(&self, address: Address) -> AddressActorHandle {
        if let Some(handle) = self.addresses.get(&address) {
            return handle.clone();
        }
        let handle = AddressActor::spawn(address, self.chain.clone(), self.order_db.clone());
        self.addresses.entry(address).or_insert(handle).clone()
    }

    /// Computes the offset consumption should resume from: one past the
    /// minimum last-applied offset across every registered pair's
    /// persisted snapshot, so no pair misses an event even if its own
    /// snapshot was taken earlier than another's (spec.md §6). Any pair
    /// with no snapshot yet forces replay all the way back to offset 0,
    /// since nothing of its history has been durably applied.
    fn restore_offset(&self) -> u64 {
        let mut min_next: Option<u64> = None;
        for pair in self.pairs.all_pairs() {
            let (handle, restored) = OrderBookActor::spawn(
                pair,
                self.pairs.rules_for(&pair),
                self.min_fill_unit,
                self.kv.clone(),
                self.snapshot_interval_for(&pair),
            );
            self.order_books.insert(pair, handle);
            let next_for_pair = restored.map(|o| o + 1).unwrap_or(0);
            min_next = Some(min_next.map_or(next_for_pair, |m: u64| m.min(next_for_pair)));
        }
        min_next.unwrap_or(0)
    }

    /// Validates and reserves balance for an incoming order, then appends
    /// it to `queue`. The matcher itself applies the resulting fills only
    /// once the event comes back off the queue (spec.md §4, §5): placement
    /// and matching are deliberately decoupled so every matcher replica
    /// observes the same event order.
    pub async fn submit_order(&self, order: Order, queue: &dyn EventQueue, now: u64) -> Result<(), MatcherError> {
        if !self.pairs.is_registered(&order.pair) {
            return Err(MatcherError::UnknownPair);
        }
        let address = self.get_or_spawn_address(order.owner_address());
        address.place_check(order.clone()).await?;
        queue.append(QueueEvent::PlaceOrder(order), now).await?;
        Ok(())
    }

    pub async fn submit_cancel(&self, order_id: OrderId, by: Address, queue: &dyn EventQueue, now: u64) -> Result<(), MatcherError> {
        let record = self
            .order_db
            .get(order_id)?
            .ok_or_else(|| MatcherError::Invalid("unknown order id".into()))?;
        if record.order.owner_address() != by {
            return Err(MatcherError::Invalid("only the order owner may cancel".into()));
        }
        queue.append(QueueEvent::CancelOrder { order_id, by }, now).await?;
        Ok(())
    }

    pub async fn market_status(&self, pair: &AssetPair) -> Result<MarketStatus, MatcherError> {
        Ok(self.get_or_spawn_book(*pair).market_status().await?)
    }

    /// Full order-book view (every resting order on both sides) for the
    /// HTTP order-book endpoint (spec.md §6).
    pub async fn order_book(&self, pair: &AssetPair) -> Result<crate::book::snapshot::Snapshot, MatcherError> {
        if !self.pairs.is_registered(pair) {
            return Err(MatcherError::UnknownPair);
        }
        self.get_or_spawn_book(*pair).snapshot().await
    }

    pub async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>, MatcherError> {
        Ok(self.order_db.get(order_id)?.map(|r| r.status))
    }

    pub async fn history_for(&self, address: Address) -> Result<Vec<OrderRecord>, MatcherError> {
        self.get_or_spawn_address(address).history().await
    }

    pub async fn balance_for(&self, address: Address, asset: crate::domain::AssetId) -> Result<u128, MatcherError> {
        self.get_or_spawn_address(address).balance(asset).await
    }

    pub fn known_pairs(&self) -> Vec<AssetPair> {
        self.pairs.all_pairs()
    }

    /// Forces every currently-spawned order book to snapshot immediately,
    /// used on graceful shutdown (spec.md §10.6) so the next startup's
    /// replay is short regardless of where each pair was in its own
    /// snapshot cycle.
    pub async fn flush_all_snapshots(&self) {
        for entry in self.order_books.iter() {
            let pair = *entry.key();
            if let Err(e) = entry.value().flush_snapshot().await {
                warn!(pair = %pair, error = %e, "failed to flush snapshot on shutdown");
            }
        }
    }

    /// Runs replay-then-live consumption of `queue`, transitioning to
    /// `Working` once the consumer reaches the queue's tip at startup.
    pub async fn run_consumer(self: MatcherHandle, queue: Arc<dyn EventQueue>) {
        let from_offset = self.restore_offset();
        let tip = queue.last_event_offset().await.unwrap_or(None);
        info!(from_offset, ?tip, "starting event consumption");

        let this = self.clone();
        let handler: Box<dyn Fn(QueueEventWithMeta) -> Result<(), MatcherError> + Send + Sync> =
            Box::new(move |meta: QueueEventWithMeta| {
                let this = this.clone();
                let offset = meta.offset;
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(this.process_event(meta))
                })?;
                if tip.is_some_and(|t| offset >= t) {
                    this.set_working();
                }
                Ok(())
            });

        if let Err(e) = queue.start_consume(from_offset, handler).await {
            error!(error = %e, "event consumption loop exited with error");
        }
    }

    async fn process_event(&self, meta: QueueEventWithMeta) -> Result<(), MatcherError> {
        let Some(pair) = meta.event.pair() else {
            return self.process_cancel(meta).await;
        };
        let book = self.get_or_spawn_book(pair);
        let timestamp = meta.timestamp;
        let taker = match &meta.event {
            QueueEvent::PlaceOrder(order) => Some((order.owner_address(), order.side)),
            _ => None,
        };
        let outcome = book.apply(meta).await?;
        self.apply_fills(pair, &outcome, taker, timestamp).await;
        Ok(())
    }

    async fn process_cancel(&self, meta: QueueEventWithMeta) -> Result<(), MatcherError> {
        let QueueEvent::CancelOrder { order_id, .. } = meta.event else { return Ok(()) };
        let Some(record) = self.order_db.get(order_id)? else {
            warn!(%order_id, "cancel for unknown order, ignoring");
            return Ok(());
        };
        let book = self.get_or_spawn_book(record.order.pair);
        if let Some(status) = book.cancel(order_id, meta.offset).await? {
            let address = self.get_or_spawn_address(record.order.owner_address());
            address.apply_cancel(order_id, status).await;
        }
        Ok(())
    }

    async fn apply_fills(
        &self,
        pair: AssetPair,
        outcome: &MatchOutcome,
        taker: Option<(Address, Side)>,
        timestamp: u64,
    ) {
        for fill in &outcome.fills {
            if let Ok(Some(maker_record)) = self.order_db.get(fill.maker_order_id) {
                let maker_address = self.get_or_spawn_address(maker_record.order.owner_address());
                maker_address.apply_fill(fill.maker_order_id, fill.maker_status).await;
            }
            if let Some((_, taker_side)) = taker {
                let tx = ExchangeTransaction::from_fill(
                    pair,
                    taker_side,
                    fill.taker_order_id,
                    fill.maker_order_id,
                    fill.price,
                    fill.amount,
                    fill.taker_fee,
                    fill.maker_fee,
                    timestamp,
                );
                self.broadcast_settlement(tx);
            }
        }
        if let (Some((owner, _)), Some(status)) = (taker, outcome.taker_status) {
            let address = self.get_or_spawn_address(owner);
            let taker_id = outcome
                .fills
                .first()
                .map(|f| f.taker_order_id)
                .unwrap_or(OrderId([0u8; 32]));
            address.apply_fill(taker_id, status).await;
        }
    }

    /// Hands a crossing's settlement transaction to the broadcaster on a
    /// detached task: retry/backoff and chain confirmation can take up to
    /// the configured deadline, and the consumer must keep draining the
    /// queue regardless of the outcome (spec.md §4.4, §4.8, §9).
    fn broadcast_settlement(&self, tx: ExchangeTransaction) {
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            let bytes = tx.to_bytes();
            if let Err(e) = broadcaster.broadcast_and_confirm(&tx.id, &bytes).await {
                warn!(tx_id = %hex::encode(tx.id), error = %e, "exchange transaction not confirmed");
            }
        });
    }
}
