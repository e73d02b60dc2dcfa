//! Single-writer actor owning one address's balance reservations and order
//! history (spec.md §4.5, §9). Reservation bookkeeping is the actor's
//! central invariant: `reservedBalances[asset] == sum(reservation over
//! active orders placed by this address)`.

use crate::chain::BlockchainContext;
use crate::domain::{Address, AssetId, Order, OrderId, OrderStatus};
use crate::error::MatcherError;
use crate::store::{OrderDb, OrderRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub enum AddressMessage {
    PlaceCheck { order: Order, reply: oneshot::Sender<Result<(), MatcherError>> },
    ApplyFill { order_id: OrderId, status: OrderStatus, reply: oneshot::Sender<()> },
    ApplyCancel { order_id: OrderId, status: OrderStatus, reply: oneshot::Sender<()> },
    QueryBalance { asset: AssetId, reply: oneshot::Sender<u128> },
    QueryHistory { reply: oneshot::Sender<Vec<OrderRecord>> },
}

#[derive(Clone)]
pub struct AddressActorHandle {
    tx: mpsc::Sender<AddressMessage>,
}

impl AddressActorHandle {
    /// Validates reservation capacity for `order` and, if it passes,
    /// reserves the required balance atomically with the check
    /// (spec.md §4.5) — no other message can interleave between the
    /// check and the reservation because both happen inside one actor
    /// turn.
    pub async fn place_check(&self, order: Order) -> Result<(), MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AddressMessage::PlaceCheck { order, reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("address actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("address actor dropped reply".into()))?
    }

    pub async fn apply_fill(&self, order_id: OrderId, status: OrderStatus) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(AddressMessage::ApplyFill { order_id, status, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn apply_cancel(&self, order_id: OrderId, status: OrderStatus) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(AddressMessage::ApplyCancel { order_id, status, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn balance(&self, asset: AssetId) -> Result<u128, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AddressMessage::QueryBalance { asset, reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("address actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("address actor dropped reply".into()))
    }

    pub async fn history(&self) -> Result<Vec<OrderRecord>, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AddressMessage::QueryHistory { reply })
            .await
            .map_err(|_| MatcherError::InternalInvariant("address actor mailbox closed".into()))?;
        rx.await.map_err(|_| MatcherError::InternalInvariant("address actor dropped reply".into()))
    }
}

struct ActiveReservation {
    primary: (AssetId, u128),
    fee: Option<(AssetId, u128)>,
}

pub struct AddressActor {
    address: Address,
    chain: Arc<dyn BlockchainContext>,
    order_db: Arc<OrderDb>,
    reserved: HashMap<AssetId, u128>,
    active_orders: HashMap<OrderId, ActiveReservation>,
}

impl AddressActor {
    pub fn spawn(address: Address, chain: Arc<dyn BlockchainContext>, order_db: Arc<OrderDb>) -> AddressActorHandle {
        let (tx, rx) = mpsc::channel(256);
        let actor = AddressActor {
            address,
            chain,
            order_db,
            reserved: HashMap::new(),
            active_orders: HashMap::new(),
        };
        tokio::spawn(actor.run(rx));
        AddressActorHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<AddressMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                AddressMessage::PlaceCheck { order, reply } => {
                    let result = self.handle_place_check(order).await;
                    let _ = reply.send(result);
                }
                AddressMessage::ApplyFill { order_id, status, reply } => {
                    self.handle_apply_fill(order_id, status);
                    let _ = reply.send(());
                }
                AddressMessage::ApplyCancel { order_id, status, reply } => {
                    self.handle_apply_cancel(order_id, status);
                    let _ = reply.send(());
                }
                AddressMessage::QueryBalance { asset, reply } => {
                    let _ = reply.send(self.reserved.get(&asset).copied().unwrap_or(0));
                }
                AddressMessage::QueryHistory { reply } => {
                    let result = self.order_db.history_for(self.address).unwrap_or_default();
                    let _ = reply.send(result);
                }
            }
        }
        tracing::info!(address = %self.address, "address actor mailbox closed, exiting");
    }

    async fn handle_place_check(&mut self, order: Order) -> Result<(), MatcherError> {
        let primary = order.required_reservation();
        let fee = order.fee_reservation_for(order.matcher_fee);

        let spendable_primary = self.chain.spendable_balance(&self.address, &primary.0).await?;
        let available_primary = spendable_primary.saturating_sub(self.reserved.get(&primary.0).copied().unwrap_or(0));
        if primary.1 > available_primary {
            return Err(MatcherError::InsufficientBalance { needed: primary.1, spendable: available_primary });
        }
        if let Some((fee_asset, fee_amount)) = fee {
            let spendable_fee = self.chain.spendable_balance(&self.address, &fee_asset).await?;
            let available_fee = spendable_fee.saturating_sub(self.reserved.get(&fee_asset).copied().unwrap_or(0));
            if fee_amount > available_fee {
                return Err(MatcherError::InsufficientBalance { needed: fee_amount, spendable: available_fee });
            }
        }

        *self.reserved.entry(primary.0).or_insert(0) += primary.1;
        if let Some((fee_asset, fee_amount)) = fee {
            *self.reserved.entry(fee_asset).or_insert(0) += fee_amount;
        }
        self.active_orders.insert(order.id, ActiveReservation { primary, fee });
        self.order_db.insert(&OrderRecord { order, status: OrderStatus::Accepted })?;
        Ok(())
    }

    fn handle_apply_fill(&mut self, order_id: OrderId, status: OrderStatus) {
        if let Err(e) = self.order_db.update_status(order_id, status) {
            tracing::warn!(address = %self.address, error = %e, "failed to persist fill status");
        }
        if status.is_terminal() {
            self.release_reservation(order_id);
        } else {
            self.shrink_reservation(order_id, status);
        }
    }

    fn handle_apply_cancel(&mut self, order_id: OrderId, status: OrderStatus) {
        if let Err(e) = self.order_db.update_status(order_id, status) {
            tracing::warn!(address = %self.address, error = %e, "failed to persist cancel status");
        }
        self.release_reservation(order_id);
    }

    /// Shrinks a still-active order's reservation to what's required for
    /// its remaining (unfilled) amount and fee, per spec.md §4.5's
    /// "`ApplyFill` decreases reservation accordingly".
    fn shrink_reservation(&mut self, order_id: OrderId, status: OrderStatus) {
        let Ok(Some(record)) = self.order_db.get(order_id) else { return };
        let Some(active) = self.active_orders.get_mut(&order_id) else { return };

        let remaining_amount = record.order.amount.saturating_sub(status.filled_amount());
        let remaining_fee = record.order.matcher_fee.saturating_sub(status.filled_fee());
        let new_primary = record.order.required_reservation_for(remaining_amount, remaining_fee);
        let new_fee = record.order.fee_reservation_for(remaining_fee);

        Self::rebucket(&mut self.reserved, active.primary, new_primary);
        match (active.fee, new_fee) {
            (Some(old), Some(new)) => Self::rebucket(&mut self.reserved, old, new),
            (Some(old), None) => Self::rebucket(&mut self.reserved, old, (old.0, 0)),
            _ => {}
        }
        active.primary = new_primary;
        active.fee = new_fee;
    }

    fn rebucket(reserved: &mut HashMap<AssetId, u128>, old: (AssetId, u128), new: (AssetId, u128)) {
        if let Some(bucket) = reserved.get_mut(&old.0) {
            *bucket = bucket.saturating_sub(old.1);
        }
        *reserved.entry(new.0).or_insert(0) += new.1;
    }

    /// Releases the full remaining reservation held for a now-terminal
    /// order, preserving `reservedBalances[asset] == sum(reservation over
    /// active orders)` (spec.md §4.5).
    fn release_reservation(&mut self, order_id: OrderId) {
        if let Some(active) = self.active_orders.remove(&order_id) {
            if let Some(bucket) = self.reserved.get_mut(&active.primary.0) {
                *bucket = bucket.saturating_sub(active.primary.1);
            }
            if let Some((fee_asset, fee_amount)) = active.fee {
                if let Some(bucket) = self.reserved.get_mut(&fee_asset) {
                    *bucket = bucket.saturating_sub(fee_amount);
                }
            }
        }
    }
}
