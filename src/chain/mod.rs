//! The matcher's view onto the external blockchain: asset existence,
//! account scripts, and balances (spec.md §6 collaborators). Abstracted
//! behind a trait so the validator and broadcaster are testable without a
//! live node, the same seam `BlockchainContext`-style traits give the
//! teacher's simulation code against `backtest_v2`'s matching engine.

pub mod mock;

use crate::domain::{Address, AssetId, Order};
use crate::error::MatcherError;
use async_trait::async_trait;

pub use mock::MockChain;

#[async_trait]
pub trait BlockchainContext: Send + Sync {
    async fn asset_exists(&self, asset: &AssetId) -> Result<bool, MatcherError>;

    async fn asset_decimals(&self, asset: &AssetId) -> Result<u8, MatcherError>;

    async fn has_order_script(&self, owner: &Address) -> Result<bool, MatcherError>;

    /// Evaluates the account script attached to `owner`, if any, against
    /// `order`. Returns whether the script allows the order.
    async fn run_order_script(&self, order: &Order) -> Result<bool, MatcherError>;

    async fn spendable_balance(&self, owner: &Address, asset: &AssetId) -> Result<u128, MatcherError>;

    /// Submits a signed settlement transaction to the node's UTX pool.
    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<(), MatcherError>;

    /// Polls whether a previously broadcast transaction, identified by its
    /// id bytes, has been included in a block.
    async fn is_confirmed(&self, tx_id: &[u8]) -> Result<bool, MatcherError>;
}
