//! Submits settlement transactions to the chain's UTX pool and polls for
//! inclusion, retrying with exponential backoff until a deadline
//! (spec.md §4.4's "broadcast rejection doesn't unwind matcher state").
//!
//! Backoff shape (base, multiplier, cap, jitter) is grounded on
//! `scrapers/binance_session.rs`'s `SessionConfig`/`next_backoff`.

use crate::chain::BlockchainContext;
use crate::error::MatcherError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub deadline_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { backoff_base_ms: 200, backoff_max_ms: 10_000, backoff_multiplier: 2.0, deadline_ms: 120_000 }
    }
}

struct Backoff {
    config: BroadcastConfig,
    attempt: u32,
    rng_state: u64,
}

impl Backoff {
    fn new(config: BroadcastConfig, seed: u64) -> Self {
        Self { config, attempt: 0, rng_state: seed.max(1) }
    }

    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.config.backoff_base_ms as f64 * self.config.backoff_multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.backoff_max_ms as f64);
        let jitter = (self.next_random() - 0.5) * capped * 0.3;
        self.attempt += 1;
        Duration::from_millis((capped + jitter).max(self.config.backoff_base_ms as f64) as u64)
    }
}

/// Broadcasts a signed settlement transaction and blocks until either the
/// chain confirms it or `config.deadline_ms` elapses.
pub struct ExchangeTransactionBroadcaster {
    chain: Arc<dyn BlockchainContext>,
    config: BroadcastConfig,
}

impl ExchangeTransactionBroadcaster {
    pub fn new(chain: Arc<dyn BlockchainContext>, config: BroadcastConfig) -> Self {
        Self { chain, config }
    }

    pub async fn broadcast_and_confirm(&self, tx_id: &[u8], tx_bytes: &[u8]) -> Result<(), MatcherError> {
        self.chain.broadcast(tx_bytes).await?;
        info!(tx_id = %hex::encode(tx_id), "exchange transaction submitted to UTX pool");

        let started = std::time::Instant::now();
        let deadline = Duration::from_millis(self.config.deadline_ms);
        let mut backoff = Backoff::new(self.config.clone(), u64::from_le_bytes(tx_id[..8].try_into().unwrap_or([1; 8])));

        loop {
            if self.chain.is_confirmed(tx_id).await? {
                info!(tx_id = %hex::encode(tx_id), "exchange transaction confirmed");
                return Ok(());
            }
            if started.elapsed() >= deadline {
                warn!(tx_id = %hex::encode(tx_id), "exchange transaction not confirmed before deadline");
                return Err(MatcherError::Timeout(format!(
                    "transaction {} not confirmed within {}ms",
                    hex::encode(tx_id),
                    self.config.deadline_ms
                )));
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;

    #[tokio::test]
    async fn confirms_once_chain_reports_inclusion() {
        let chain = Arc::new(MockChain::new());
        let tx_id = [9u8; 32];
        chain.confirm(&tx_id);
        let broadcaster = ExchangeTransactionBroadcaster::new(
            chain,
            BroadcastConfig { backoff_base_ms: 1, backoff_max_ms: 2, backoff_multiplier: 1.0, deadline_ms: 1000 },
        );
        broadcaster.broadcast_and_confirm(&tx_id, b"tx-bytes").await.unwrap();
    }

    #[tokio::test]
    async fn times_out_when_never_confirmed() {
        let chain = Arc::new(MockChain::new());
        let tx_id = [3u8; 32];
        let broadcaster = ExchangeTransactionBroadcaster::new(
            chain,
            BroadcastConfig { backoff_base_ms: 1, backoff_max_ms: 2, backoff_multiplier: 1.0, deadline_ms: 20 },
        );
        let result = broadcaster.broadcast_and_confirm(&tx_id, b"tx-bytes").await;
        assert!(matches!(result, Err(MatcherError::Timeout(_))));
    }
}
