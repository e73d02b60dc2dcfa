//! An in-memory `BlockchainContext` double for tests, grounded on
//! `backtest_v2/matching.rs`'s and `oms.rs`'s practice of constructing
//! fully in-memory fixtures rather than mocking framework traits.

use super::BlockchainContext;
use crate::domain::{Address, AssetId, Order};
use crate::error::MatcherError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct MockChain {
    known_assets: DashMap<AssetId, u8>,
    scripted_accounts: DashMap<Address, bool>,
    balances: DashMap<(Address, AssetId), u128>,
    confirmed: Mutex<HashSet<Vec<u8>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            known_assets: DashMap::new(),
            scripted_accounts: DashMap::new(),
            balances: DashMap::new(),
            confirmed: Mutex::new(HashSet::new()),
        }
    }

    pub fn register_asset(&self, asset: AssetId, decimals: u8) {
        self.known_assets.insert(asset, decimals);
    }

    pub fn set_script_allows(&self, owner: Address, allows: bool) {
        self.scripted_accounts.insert(owner, allows);
    }

    pub fn set_balance(&self, owner: Address, asset: AssetId, amount: u128) {
        self.balances.insert((owner, asset), amount);
    }

    pub fn confirm(&self, tx_id: &[u8]) {
        self.confirmed.lock().expect("confirmed set poisoned").insert(tx_id.to_vec());
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockchainContext for MockChain {
    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, MatcherError> {
        Ok(asset.is_native() || self.known_assets.contains_key(asset))
    }

    async fn asset_decimals(&self, asset: &AssetId) -> Result<u8, MatcherError> {
        if asset.is_native() {
            return Ok(8);
        }
        self.known_assets
            .get(asset)
            .map(|d| *d)
            .ok_or(MatcherError::UnknownPair)
    }

    async fn has_order_script(&self, owner: &Address) -> Result<bool, MatcherError> {
        Ok(self.scripted_accounts.contains_key(owner))
    }

    async fn run_order_script(&self, order: &Order) -> Result<bool, MatcherError> {
        Ok(self.scripted_accounts.get(&order.owner_address()).map(|v| *v).unwrap_or(true))
    }

    async fn spendable_balance(&self, owner: &Address, asset: &AssetId) -> Result<u128, MatcherError> {
        Ok(self.balances.get(&(*owner, *asset)).map(|b| *b).unwrap_or(0))
    }

    async fn broadcast(&self, _tx_bytes: &[u8]) -> Result<(), MatcherError> {
        Ok(())
    }

    async fn is_confirmed(&self, tx_id: &[u8]) -> Result<bool, MatcherError> {
        Ok(self.confirmed.lock().expect("confirmed set poisoned").contains(tx_id))
    }
}
