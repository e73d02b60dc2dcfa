//! Stateless order validation pipeline (spec.md §4.2), run before an order
//! is admitted to the queue.
//!
//! The staged reject-with-reason shape is grounded on
//! `backtest_v2/oms.rs`'s `OrderManagementSystem::validate_order`: a
//! sequence of independent checks, each returning a typed rejection as
//! soon as one fails, with `VenueConstraints` as the configured guardrail
//! values (here `ValidatorConfig`).

use crate::actors::MatcherHandle;
use crate::chain::BlockchainContext;
use crate::domain::{Address, AssetId, Order, Side};
use crate::error::MatcherError;
use crate::store::{AssetDecimalsCache, AssetPairRegistry, RateCache};
use std::sync::Arc;

/// Scale of the integer micro-unit rates `RateCache` stores: a rate of
/// `RATE_SCALE` means the asset is worth 1 native unit.
const RATE_SCALE: u128 = 1_000_000;

/// Matcher-settings-independent guardrails, configured per deployment
/// (spec.md §6 `orderRestrictions`, `allowedOrderVersions`, `orderFee`,
/// `deviation`, `blacklistedAssets`, `blacklistedAddresses`).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub min_order_amount: u64,
    pub max_order_lifetime_ms: u64,
    pub min_matcher_fee: u64,
    /// Empty means every order version is accepted.
    pub allowed_order_versions: Vec<u8>,
    /// Empty means any `feeAsset` is accepted.
    pub allowed_fee_assets: Vec<AssetId>,
    pub blacklisted_assets: Vec<AssetId>,
    pub blacklisted_addresses: Vec<Address>,
    /// Maximum allowed deviation from the current best opposite price, in
    /// basis points of that price. `0` disables the check.
    pub price_deviation_bps: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_order_amount: 1,
            max_order_lifetime_ms: 30 * 24 * 60 * 60 * 1000,
            min_matcher_fee: 0,
            allowed_order_versions: Vec::new(),
            allowed_fee_assets: Vec::new(),
            blacklisted_assets: Vec::new(),
            blacklisted_addresses: Vec::new(),
            price_deviation_bps: 0,
        }
    }
}

/// Runs the four-stage pipeline spec.md §4.2 describes: matcher-settings-
/// aware, time-aware, market-aware, and blockchain-aware checks, in that
/// order, short-circuiting on the first failure.
pub struct OrderValidator {
    config: ValidatorConfig,
    pairs: Arc<AssetPairRegistry>,
    decimals: Arc<AssetDecimalsCache>,
    rates: Arc<RateCache>,
    chain: Arc<dyn BlockchainContext>,
    matcher: MatcherHandle,
}

impl OrderValidator {
    pub fn new(
        config: ValidatorConfig,
        pairs: Arc<AssetPairRegistry>,
        decimals: Arc<AssetDecimalsCache>,
        rates: Arc<RateCache>,
        chain: Arc<dyn BlockchainContext>,
        matcher: MatcherHandle,
    ) -> Self {
        Self { config, pairs, decimals, rates, chain, matcher }
    }

    pub async fn validate(&self, order: &Order, now: u64) -> Result<(), MatcherError> {
        self.validate_matcher_settings(order)?;
        self.validate_time(order, now)?;
        self.validate_market(order).await?;
        self.validate_blockchain(order).await?;
        Ok(())
    }

    fn validate_matcher_settings(&self, order: &Order) -> Result<(), MatcherError> {
        if order.amount < self.config.min_order_amount {
            return Err(MatcherError::Invalid(format!(
                "amount {} below minimum {}",
                order.amount, self.config.min_order_amount
            )));
        }
        let native_fee = self.matcher_fee_in_native(order);
        if native_fee < self.config.min_matcher_fee {
            return Err(MatcherError::Invalid(format!(
                "matcher fee {} (native-equivalent {native_fee}) below minimum {}",
                order.matcher_fee, self.config.min_matcher_fee
            )));
        }
        if !self.config.allowed_order_versions.is_empty()
            && !self.config.allowed_order_versions.contains(&order.version.0)
        {
            return Err(MatcherError::Invalid(format!("order version {} not allowed", order.version.0)));
        }
        if !self.config.allowed_fee_assets.is_empty() && !self.config.allowed_fee_assets.contains(&order.fee_asset) {
            return Err(MatcherError::Invalid(format!("fee asset {} not allowed", order.fee_asset)));
        }
        if self.config.blacklisted_assets.contains(&order.pair.amount_asset)
            || self.config.blacklisted_assets.contains(&order.pair.price_asset)
            || self.config.blacklisted_assets.contains(&order.fee_asset)
        {
            return Err(MatcherError::Invalid("order references a blacklisted asset".into()));
        }
        if self.config.blacklisted_addresses.contains(&order.owner_address()) {
            return Err(MatcherError::Invalid("order owner is blacklisted".into()));
        }
        order.check_static_invariants()?;
        order.verify_signature()?;
        if order.id != order.derive_id() {
            return Err(MatcherError::Invalid("order id does not match canonical bytes".into()));
        }
        Ok(())
    }

    /// Converts `order.matcher_fee` to native-asset terms via `RateCache`
    /// so the minimum-fee floor applies uniformly regardless of which
    /// asset the fee was paid in (spec.md §4.2: "fee ≥ minimum given rate
    /// cache"). Falls back to the raw fee, logged, when the fee asset has
    /// no published rate yet.
    fn matcher_fee_in_native(&self, order: &Order) -> u64 {
        if order.fee_asset.is_native() {
            return order.matcher_fee;
        }
        match self.rates.rate_of(&order.fee_asset) {
            Some(rate) => ((order.matcher_fee as u128 * rate as u128) / RATE_SCALE) as u64,
            None => {
                tracing::warn!(asset = %order.fee_asset, "no published rate for fee asset, comparing raw fee");
                order.matcher_fee
            }
        }
    }

    fn validate_time(&self, order: &Order, now: u64) -> Result<(), MatcherError> {
        if order.expiration <= now {
            return Err(MatcherError::Invalid("order already expired".into()));
        }
        let lifetime = order.expiration.saturating_sub(order.timestamp);
        if lifetime > self.config.max_order_lifetime_ms {
            return Err(MatcherError::Invalid(format!(
                "order lifetime {lifetime}ms exceeds maximum {}ms",
                self.config.max_order_lifetime_ms
            )));
        }
        Ok(())
    }

    async fn validate_market(&self, order: &Order) -> Result<(), MatcherError> {
        let pair = &order.pair;
        if !self.pairs.is_registered(pair) {
            return Err(MatcherError::UnknownPair);
        }
        let status = self.matcher.market_status(pair).await?;

        if let crate::book::rules::TickSize::Enabled(ticks) = status.aggregation {
            if ticks > 0 && order.price % ticks != 0 {
                return Err(MatcherError::Invalid(format!(
                    "price {} is not aligned to tick size {ticks}",
                    order.price
                )));
            }
        }

        if self.config.price_deviation_bps > 0 {
            let opposite = match order.side {
                Side::Buy => status.best_ask,
                Side::Sell => status.best_bid,
            };
            if let Some(reference) = opposite {
                let deviation = reference as u128 * self.config.price_deviation_bps as u128 / 10_000;
                let low = reference.saturating_sub(deviation as u64);
                let high = reference.saturating_add(deviation as u64);
                if order.price < low || order.price > high {
                    return Err(MatcherError::Invalid(format!(
                        "price {} deviates from best opposite price {reference} by more than {}bps",
                        order.price, self.config.price_deviation_bps
                    )));
                }
            }
        }
        Ok(())
    }

    async fn validate_blockchain(&self, order: &Order) -> Result<(), MatcherError> {
        if !self.chain.asset_exists(&order.pair.amount_asset).await? {
            return Err(MatcherError::UnknownPair);
        }
        if !self.chain.asset_exists(&order.pair.price_asset).await? {
            return Err(MatcherError::UnknownPair);
        }
        self.ensure_decimals_cached(&order.pair.amount_asset).await;
        self.ensure_decimals_cached(&order.pair.price_asset).await;
        if self.chain.has_order_script(&order.owner_address()).await? {
            let allowed = self.chain.run_order_script(order).await?;
            if !allowed {
                return Err(MatcherError::ScriptDenied("account script rejected order".into()));
            }
        }
        Ok(())
    }

    /// Populates `AssetDecimalsCache` for `asset` on first use, defaulting
    /// to 8 decimals if the chain lookup fails, per spec.md §4.9.
    async fn ensure_decimals_cached(&self, asset: &crate::domain::AssetId) {
        if self.decimals.decimals_of(asset).is_some() {
            return;
        }
        let decimals = match self.chain.asset_decimals(asset).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(%asset, error = %e, "asset decimals lookup failed, defaulting to 8");
                8
            }
        };
        self.decimals.set_decimals(*asset, decimals);
    }
}
