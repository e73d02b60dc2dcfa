//! Durable and cached state: the KV store, order index, pair registry, and
//! hot-path lookup caches.

pub mod caches;
pub mod kv;
pub mod order_db;
pub mod pair_registry;

pub use caches::{AssetDecimalsCache, AssetTables, RateCache, SubmissionRateLimiter};
pub use kv::KvStore;
pub use order_db::{OrderDb, OrderRecord};
pub use pair_registry::AssetPairRegistry;
