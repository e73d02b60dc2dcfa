//! The registry of tradeable asset pairs and each pair's matching rules.
//!
//! Grounded on `signals/storage.rs`'s pattern of a `DashMap`-backed
//! registry loaded once at startup and mutated only through explicit
//! admin events, adapted to the matcher's `AssetPair -> MatchingRules`
//! mapping (spec.md §3, §4.3).

use crate::book::rules::MatchingRules;
use crate::domain::AssetPair;
use crate::error::MatcherError;
use crate::store::kv::{KvStore, CF_PAIRS};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairRules {
    rules: Vec<(u64, crate::book::rules::TickSize)>,
}

pub struct AssetPairRegistry {
    kv: KvStore,
    pairs: DashMap<AssetPair, MatchingRules>,
}

impl AssetPairRegistry {
    pub fn new(kv: KvStore) -> Result<Self, MatcherError> {
        let registry = Self { kv, pairs: DashMap::new() };
        registry.load_all()?;
        Ok(registry)
    }

    fn load_all(&self) -> Result<(), MatcherError> {
        for (key, value) in self.kv.iter_all(CF_PAIRS)? {
            let pair: AssetPair = bincode::deserialize(&key)?;
            let stored: PairRules = bincode::deserialize(&value)?;
            self.pairs.insert(pair, MatchingRules::new(stored.rules));
        }
        Ok(())
    }

    pub fn is_registered(&self, pair: &AssetPair) -> bool {
        self.pairs.contains_key(pair)
    }

    pub fn register(&self, pair: AssetPair, rules: MatchingRules) -> Result<(), MatcherError> {
        let stored = PairRules { rules: rules.as_vec() };
        let key = bincode::serialize(&pair)?;
        let value = bincode::serialize(&stored)?;
        self.kv.put(CF_PAIRS, &key, &value)?;
        self.pairs.insert(pair, rules);
        Ok(())
    }

    pub fn deregister(&self, pair: &AssetPair) -> Result<(), MatcherError> {
        let key = bincode::serialize(pair)?;
        self.kv.delete(CF_PAIRS, &key)?;
        self.pairs.remove(pair);
        Ok(())
    }

    pub fn rules_for(&self, pair: &AssetPair) -> MatchingRules {
        self.pairs.get(pair).map(|r| r.clone()).unwrap_or_else(MatchingRules::disabled)
    }

    pub fn all_pairs(&self) -> Vec<AssetPair> {
        self.pairs.iter().map(|e| *e.key()).collect()
    }
}
