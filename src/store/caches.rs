//! Fast-path read caches: per-address submission rate limiting and the
//! published decimals/rate tables the validator consults on every order.
//!
//! The rate limiter's sliding-window shape is grounded on
//! `backtest_v2/oms.rs`'s `RateLimiter`. The published tables use
//! `arc_swap` so readers on the hot path never block a writer refreshing
//! them, the same trade-off `oms.rs` makes by keeping hot counters on the
//! struct itself rather than behind a lock. `RateCache` additionally
//! persists to `KvStore` so fee rates survive a restart, grounded on
//! `AssetPairRegistry`'s load-at-construction, write-through pattern.

use crate::domain::{Address, AssetId};
use crate::error::MatcherError;
use crate::store::kv::{KvStore, CF_RATES};
use arc_swap::ArcSwap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct Window {
    window_ms: u64,
    max_events: u32,
    events: VecDeque<u64>,
}

impl Window {
    fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self { window_ms, max_events: max_per_window, events: VecDeque::with_capacity(max_per_window as usize) }
    }

    fn try_acquire(&mut self, now_ms: u64) -> bool {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while matches!(self.events.front(), Some(&t) if t < cutoff) {
            self.events.pop_front();
        }
        if self.events.len() as u32 >= self.max_events {
            return false;
        }
        self.events.push_back(now_ms);
        true
    }
}

/// Per-address sliding-window order/cancel submission limiter. Not part of
/// the core spec; an ambient guardrail against a single address flooding
/// the queue with placements, applied by the HTTP layer before an order
/// reaches `OrderValidator`. Single-writer per address in practice since
/// callers only touch it from request handlers for that address, but
/// guarded with a mutex for the rare cross-request inspection.
pub struct SubmissionRateLimiter {
    max_per_window: u32,
    window_ms: u64,
    windows: dashmap::DashMap<Address, parking_lot::Mutex<Window>>,
}

impl SubmissionRateLimiter {
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self { max_per_window, window_ms, windows: dashmap::DashMap::new() }
    }

    pub fn try_acquire(&self, address: Address, now_ms: u64) -> bool {
        let entry = self
            .windows
            .entry(address)
            .or_insert_with(|| parking_lot::Mutex::new(Window::new(self.max_per_window, self.window_ms)));
        entry.lock().try_acquire(now_ms)
    }
}

/// The published view of asset decimals, refreshed wholesale and read
/// lock-free via `ArcSwap` (spec.md §4.9's `AssetDecimalsCache`).
#[derive(Debug, Clone, Default)]
pub struct AssetTables {
    pub decimals: HashMap<AssetId, u8>,
}

pub struct AssetDecimalsCache {
    published: ArcSwap<AssetTables>,
}

impl AssetDecimalsCache {
    pub fn new() -> Self {
        Self { published: ArcSwap::from_pointee(AssetTables::default()) }
    }

    pub fn decimals_of(&self, asset: &AssetId) -> Option<u8> {
        self.published.load().decimals.get(asset).copied()
    }

    pub fn refresh(&self, tables: AssetTables) {
        self.published.store(Arc::new(tables));
    }

    /// Lazily records a single asset's decimals, read-modify-write over
    /// the published snapshot (spec.md §4.9: "populated lazily from
    /// blockchain context").
    pub fn set_decimals(&self, asset: AssetId, decimals: u8) {
        let mut tables = (**self.published.load()).clone();
        tables.decimals.insert(asset, decimals);
        self.published.store(Arc::new(tables));
    }
}

impl Default for AssetDecimalsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistent asset-id → fee rate cache (spec.md §4.9: "integer
/// micro-units; persistent; atomic update"). Loads its full contents from
/// `CF_RATES` at construction, same load-then-publish shape as
/// `AssetDecimalsCache`, then keeps the published map current one entry at
/// a time as rates are set.
pub struct RateCache {
    kv: KvStore,
    published: ArcSwap<HashMap<AssetId, u64>>,
}

impl RateCache {
    pub fn new(kv: KvStore) -> Result<Self, MatcherError> {
        let mut rates = HashMap::new();
        for (key, value) in kv.iter_all(CF_RATES)? {
            let asset: AssetId = bincode::deserialize(&key)?;
            let rate_bytes: [u8; 8] = value
                .as_slice()
                .try_into()
                .map_err(|_| MatcherError::InternalInvariant(format!("corrupt rate entry for asset {asset}")))?;
            rates.insert(asset, u64::from_be_bytes(rate_bytes));
        }
        Ok(Self { kv, published: ArcSwap::from_pointee(rates) })
    }

    pub fn rate_of(&self, asset: &AssetId) -> Option<u64> {
        self.published.load().get(asset).copied()
    }

    /// Persists `rate` for `asset` and atomically republishes the full
    /// table (spec.md §4.9: "atomic update").
    pub fn set_rate(&self, asset: AssetId, rate: u64) -> Result<(), MatcherError> {
        let key = bincode::serialize(&asset)?;
        self.kv.put(CF_RATES, &key, &rate.to_be_bytes())?;
        let mut rates = (**self.published.load()).clone();
        rates.insert(asset, rate);
        self.published.store(Arc::new(rates));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let asset = AssetId::issued_from_bytes(b"usdt");

        {
            let kv = KvStore::open(dir.path()).unwrap();
            let cache = RateCache::new(kv).unwrap();
            assert_eq!(cache.rate_of(&asset), None);
            cache.set_rate(asset, 2_500_000).unwrap();
            assert_eq!(cache.rate_of(&asset), Some(2_500_000));
        }

        let kv = KvStore::open(dir.path()).unwrap();
        let reopened = RateCache::new(kv).unwrap();
        assert_eq!(reopened.rate_of(&asset), Some(2_500_000));
    }
}
