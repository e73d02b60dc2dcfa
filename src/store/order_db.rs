//! Durable order status index: the last known status of every order the
//! matcher has ever seen, queryable by id and by owner (spec.md §3, §6).

use crate::domain::{Address, Order, OrderId, OrderStatus};
use crate::error::MatcherError;
use crate::store::kv::{KvStore, CF_ORDERS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order: Order,
    pub status: OrderStatus,
}

/// A handle onto the persisted order index, backed by `KvStore`. Reads and
/// writes are keyed on the order id; a secondary in-memory index keeps the
/// per-owner order list for history queries.
pub struct OrderDb {
    kv: KvStore,
    by_owner: dashmap::DashMap<Address, Vec<OrderId>>,
}

impl OrderDb {
    pub fn new(kv: KvStore) -> Self {
        Self { kv, by_owner: dashmap::DashMap::new() }
    }

    pub fn insert(&self, record: &OrderRecord) -> Result<(), MatcherError> {
        let key = record.order.id.0;
        let bytes = bincode::serialize(record)?;
        self.kv.put(CF_ORDERS, &key, &bytes)?;
        self.by_owner.entry(record.order.owner_address()).or_default().push(record.order.id);
        Ok(())
    }

    pub fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<(), MatcherError> {
        let Some(mut record) = self.get(id)? else {
            return Err(MatcherError::InternalInvariant(format!("status update for unknown order {id}")));
        };
        record.status = status;
        let bytes = bincode::serialize(&record)?;
        self.kv.put(CF_ORDERS, &id.0, &bytes)?;
        Ok(())
    }

    pub fn get(&self, id: OrderId) -> Result<Option<OrderRecord>, MatcherError> {
        match self.kv.get(CF_ORDERS, &id.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn history_for(&self, owner: Address) -> Result<Vec<OrderRecord>, MatcherError> {
        let ids = self.by_owner.get(&owner).map(|v| v.clone()).unwrap_or_default();
        ids.into_iter().filter_map(|id| self.get(id).transpose()).collect()
    }

    /// Rebuilds the owner index from the durable store; called once at
    /// startup before replay resumes.
    pub fn rebuild_index(&self) -> Result<(), MatcherError> {
        self.by_owner.clear();
        for (_, value) in self.kv.iter_all(CF_ORDERS)? {
            let record: OrderRecord = bincode::deserialize(&value)?;
            self.by_owner.entry(record.order.owner_address()).or_default().push(record.order.id);
        }
        Ok(())
    }
}
