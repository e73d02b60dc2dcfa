//! Single-writer actor owning one pair's `OrderBook`. All mutation of a
//! pair's book happens inside this actor's message loop; nothing else
//! touches the book directly, satisfying the partitioned single-writer
//! invariant (spec.md §4, §9).

use crate::book::rules::MatchingRules;
use crate::book::snapshot::Snapshot;
use crate::book::{BookConfig, MatchOutcome, OrderBook};
use crate::domain::{AssetPair, MarketStatus, Order, OrderId, OrderStatus, QueueEvent, QueueEventWithMeta};
use crate::error::MatcherError;
use crate::store::KvStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub enum OrderBookMessage {
    ApplyEvent { meta: QueueEventWithMeta, reply: oneshot::Sender<Result<MatchOutcome, MatcherError>> },
    Cancel { order_id: OrderId, offset: u64, reply: oneshot::Sender<Option<OrderStatus>> },
    GetMarketStatus { reply: oneshot::Sender<MarketStatus> },
    GetSnapshot { reply: oneshot::Sender<Snapshot> },
    Ping { reply: oneshot::Sender<u64> },
    FlushSnapshot { reply: oneshot::Sender<()> },
}

#[derive(Clone)]
pub struct OrderBookActorHandle {
    tx: mpsc::Sender<OrderBookMessage>,
}

impl OrderBookActorHandle {
    /// Applies `meta` if its offset is strictly ahead of the book's last
    /// applied offset; otherwise returns the cached no-op outcome,
    /// preserving the idempotent-by-offset replay guarantee.
    pub async fn apply(&self, meta: QueueEventWithMeta) -> Result<MatchOutcome, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::ApplyEvent { meta, reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))?
    }

    pub async fn cancel(&self, order_id: OrderId, offset: u64) -> Result<Option<OrderStatus>, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::Cancel { order_id, offset, reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))
    }

    pub async fn market_status(&self) -> Result<MarketStatus, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::GetMarketStatus { reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))
    }

    pub async fn snapshot(&self) -> Result<Snapshot, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::GetSnapshot { reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))
    }

    /// Health check used by the matcher's batch-ping sweep: round-trips
    /// the mailbox and returns the book's last applied offset.
    pub async fn ping(&self) -> Result<u64, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::Ping { reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))
    }

    /// Forces an out-of-cycle snapshot write regardless of
    /// `since_snapshot`, used on graceful shutdown so a restart replays as
    /// little of the log as possible (spec.md §10.6).
    pub async fn flush_snapshot(&self) -> Result<(), MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(OrderBookMessage::FlushSnapshot { reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("order book actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("order book actor dropped reply".into()))
    }
}

pub struct OrderBookActor {
    pair: AssetPair,
    book: OrderBook,
    kv: KvStore,
    last_snapshot_offset: u64,
    snapshot_interval: u64,
}

impl OrderBookActor {
    /// Spawns the actor, restoring from the most recent persisted snapshot
    /// if one exists, and returns a cloneable handle plus the last offset
    /// that snapshot had already applied. `None` means no snapshot has
    /// ever been written for this pair, so replay must start from offset
    /// 0 rather than skip it.
    ///
    /// `snapshot_interval` is the offset gap spec.md §4.4 gates snapshots
    /// on: a snapshot is written once `offset - lastSnapshotOffset >=
    /// snapshotInterval`, configurable per pair (spec.md §6 `snapshotsInterval`).
    pub fn spawn(
        pair: AssetPair,
        rules: MatchingRules,
        min_fill_unit: u64,
        kv: KvStore,
        snapshot_interval: u64,
    ) -> (OrderBookActorHandle, Option<u64>) {
        let config = BookConfig { rules, min_fill_unit };
        let (book, restored_offset) = match load_snapshot(&kv, &pair) {
            Ok(Some(snap)) => {
                let offset = snap.offset;
                (OrderBook::restore(config, snap), Some(offset))
            }
            Ok(None) => (OrderBook::new(config), None),
            Err(e) => {
                warn!(pair = %pair, error = %e, "failed to load snapshot, starting empty");
                (OrderBook::new(BookConfig { rules: MatchingRules::disabled(), min_fill_unit }), None)
            }
        };

        let (tx, rx) = mpsc::channel(1024);
        let actor = OrderBookActor {
            pair,
            book,
            kv,
            last_snapshot_offset: restored_offset.unwrap_or(0),
            snapshot_interval,
        };
        tokio::spawn(actor.run(rx));
        (OrderBookActorHandle { tx }, restored_offset)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<OrderBookMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                OrderBookMessage::ApplyEvent { meta, reply } => {
                    let result = self.handle_apply(meta);
                    let _ = reply.send(result);
                }
                OrderBookMessage::Cancel { order_id, offset, reply } => {
                    let status = if self.already_applied(offset) {
                        None
                    } else {
                        self.book.apply_cancel(order_id, offset)
                    };
                    self.maybe_snapshot();
                    let _ = reply.send(status);
                }
                OrderBookMessage::GetMarketStatus { reply } => {
                    let _ = reply.send(self.book.market_status());
                }
                OrderBookMessage::GetSnapshot { reply } => {
                    let _ = reply.send(self.book.snapshot(self.pair));
                }
                OrderBookMessage::Ping { reply } => {
                    let _ = reply.send(self.book.last_offset().unwrap_or(0));
                }
                OrderBookMessage::FlushSnapshot { reply } => {
                    let snap = self.book.snapshot(self.pair);
                    self.last_snapshot_offset = self.book.last_offset().unwrap_or(0);
                    if let Err(e) = persist_snapshot(&self.kv, &snap) {
                        warn!(pair = %self.pair, error = %e, "failed to persist snapshot on shutdown");
                    }
                    let _ = reply.send(());
                }
            }
        }
        info!(pair = %self.pair, "order book actor mailbox closed, exiting");
    }

    fn already_applied(&self, offset: u64) -> bool {
        self.book.last_offset().is_some_and(|last| offset <= last)
    }

    fn handle_apply(&mut self, meta: QueueEventWithMeta) -> Result<MatchOutcome, MatcherError> {
        if self.already_applied(meta.offset) {
            debug!(pair = %self.pair, offset = meta.offset, "duplicate offset, ignoring");
            return Ok(MatchOutcome::default());
        }
        let outcome = match meta.event {
            QueueEvent::PlaceOrder(order) => self.apply_place(order, meta.offset, meta.timestamp)?,
            QueueEvent::CancelOrder { order_id, .. } => {
                self.book.apply_cancel(order_id, meta.offset);
                MatchOutcome::default()
            }
            QueueEvent::OrderBookDeleted { .. } => {
                self.book = OrderBook::new(BookConfig::default());
                MatchOutcome::default()
            }
        };
        self.maybe_snapshot();
        Ok(outcome)
    }

    fn apply_place(&mut self, order: Order, offset: u64, timestamp: u64) -> Result<MatchOutcome, MatcherError> {
        self.book.apply_place(order, offset, timestamp)
    }

    /// spec.md §4.4: snapshot once `offset - lastSnapshotOffset >=
    /// snapshotInterval`. A no-op event (duplicate offset, or a cancel that
    /// didn't move the book's offset) never has a current offset ahead of
    /// `last_snapshot_offset`, so it can't spuriously trigger a write.
    fn maybe_snapshot(&mut self) {
        let Some(current) = self.book.last_offset() else { return };
        if current.saturating_sub(self.last_snapshot_offset) < self.snapshot_interval {
            return;
        }
        self.last_snapshot_offset = current;
        let snap = self.book.snapshot(self.pair);
        if let Err(e) = persist_snapshot(&self.kv, &snap) {
            warn!(pair = %self.pair, error = %e, "failed to persist snapshot");
        }
    }
}

fn snapshot_key(pair: &AssetPair) -> Vec<u8> {
    pair.key().into_bytes()
}

fn load_snapshot(kv: &KvStore, pair: &AssetPair) -> Result<Option<Snapshot>, MatcherError> {
    match kv.get(crate::store::kv::CF_SNAPSHOTS, &snapshot_key(pair))? {
        Some(bytes) => Ok(Some(Snapshot::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn persist_snapshot(kv: &KvStore, snap: &Snapshot) -> Result<(), MatcherError> {
    let bytes = snap.encode()?;
    kv.put(crate::store::kv::CF_SNAPSHOTS, &snapshot_key(&snap.pair), &bytes)
}
