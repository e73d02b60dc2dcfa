//! Matcher configuration, loaded from the environment (spec.md §6's
//! recognized options), grounded on `models::Config::from_env`'s
//! `dotenv` + `env::var`-with-fallback pattern.

use crate::book::rules::{MatchingRules, TickSize};
use crate::domain::{Address, AssetId, AssetPair};
use crate::queue::remote::RemoteQueueConfig;
use crate::validator::ValidatorConfig;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub data_dir: std::path::PathBuf,
    pub queue_kind: QueueKind,
    pub local_queue_path: std::path::PathBuf,
    pub remote_queue: Option<RemoteQueueConfig>,
    pub validator: ValidatorConfig,
    pub min_fill_unit: u64,
    pub order_rate_per_window: u32,
    pub rate_window_ms: u64,
    pub broadcast_poll_interval_ms: u64,
    pub broadcast_deadline_ms: u64,
    /// `matchingRules(pair -> list)` (spec.md §6): tradeable pairs and each
    /// pair's tick-size rule schedule, registered into `AssetPairRegistry`
    /// at startup.
    pub matching_rules: Vec<(AssetPair, MatchingRules)>,
    /// `snapshotsInterval` (spec.md §6), applied to any pair not named in
    /// `snapshot_intervals`.
    pub snapshot_interval_default: u64,
    /// Per-pair overrides of `snapshot_interval_default`.
    pub snapshot_intervals: HashMap<AssetPair, u64>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let http_port = env_or("MATCHER_HTTP_PORT", "6886").parse()?;
        let data_dir = std::path::PathBuf::from(env_or("MATCHER_DATA_DIR", "./matcher-data"));
        let queue_kind = match env_or("MATCHER_QUEUE_KIND", "local").as_str() {
            "remote" => QueueKind::Remote,
            _ => QueueKind::Local,
        };
        let local_queue_path = data_dir.join(env_or("MATCHER_LOCAL_QUEUE_FILE", "events.log"));

        let remote_queue = if queue_kind == QueueKind::Remote {
            Some(RemoteQueueConfig {
                bootstrap: env_or("MATCHER_KAFKA_BOOTSTRAP", "localhost:9092"),
                topic: env_or("MATCHER_KAFKA_TOPIC", "matcher-events"),
                client_id: env_or("MATCHER_KAFKA_CLIENT_ID", "dex-matcher"),
                group_id: env_or("MATCHER_KAFKA_GROUP_ID", "dex-matcher"),
                producer_acks: env_or("MATCHER_KAFKA_ACKS", "all"),
                consumer_max_poll: env_or("MATCHER_KAFKA_MAX_POLL", "500").parse()?,
            })
        } else {
            None
        };

        let validator = ValidatorConfig {
            min_order_amount: env_or("MATCHER_MIN_ORDER_AMOUNT", "1").parse()?,
            max_order_lifetime_ms: env_or("MATCHER_MAX_ORDER_LIFETIME_MS", &(30 * 24 * 60 * 60 * 1000).to_string())
                .parse()?,
            min_matcher_fee: env_or("MATCHER_MIN_FEE", "0").parse()?,
            allowed_order_versions: parse_u8_list(&env_or("MATCHER_ALLOWED_ORDER_VERSIONS", ""))?,
            allowed_fee_assets: parse_asset_list(&env_or("MATCHER_ALLOWED_FEE_ASSETS", ""))?,
            blacklisted_assets: parse_asset_list(&env_or("MATCHER_BLACKLISTED_ASSETS", ""))?,
            blacklisted_addresses: parse_address_list(&env_or("MATCHER_BLACKLISTED_ADDRESSES", ""))?,
            price_deviation_bps: env_or("MATCHER_PRICE_DEVIATION_BPS", "0").parse()?,
        };

        let matching_rules = parse_matching_rules(&env_or("MATCHER_MATCHING_RULES", ""))?;
        let snapshot_intervals = parse_snapshot_intervals(&env_or("MATCHER_SNAPSHOT_INTERVALS", ""))?;

        Ok(Self {
            http_port,
            data_dir,
            queue_kind,
            local_queue_path,
            remote_queue,
            validator,
            min_fill_unit: env_or("MATCHER_MIN_FILL_UNIT", "1").parse()?,
            order_rate_per_window: env_or("MATCHER_ORDER_RATE_PER_WINDOW", "50").parse()?,
            rate_window_ms: env_or("MATCHER_RATE_WINDOW_MS", "1000").parse()?,
            broadcast_poll_interval_ms: env_or("MATCHER_BROADCAST_POLL_MS", "2000").parse()?,
            broadcast_deadline_ms: env_or("MATCHER_BROADCAST_DEADLINE_MS", "120000").parse()?,
            matching_rules,
            snapshot_interval_default: env_or("MATCHER_SNAPSHOT_INTERVAL", "1000").parse()?,
            snapshot_intervals,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_u8_list(raw: &str) -> anyhow::Result<Vec<u8>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().map_err(anyhow::Error::from))
        .collect()
}

fn parse_asset_list(raw: &str) -> anyhow::Result<Vec<AssetId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<AssetId>().map_err(anyhow::Error::from))
        .collect()
}

fn parse_address_list(raw: &str) -> anyhow::Result<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let bytes = hex::decode(s)?;
            let arr: [u8; 20] = bytes.try_into().map_err(|_| anyhow::anyhow!("address {s} must be 20 bytes"))?;
            Ok(Address(arr))
        })
        .collect()
}

/// One entry of a pair's tick-size rule schedule, as carried in the
/// `MATCHER_MATCHING_RULES` JSON map: `{"<amount>-<price>": [{"offset": 0,
/// "tick_size": null}, {"offset": 5000, "tick_size": 100}]}`. `tick_size:
/// null` means aggregation is disabled from that offset on.
#[derive(Debug, Deserialize)]
struct RuleEntry {
    offset: u64,
    tick_size: Option<u64>,
}

fn parse_matching_rules(raw: &str) -> anyhow::Result<Vec<(AssetPair, MatchingRules)>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: HashMap<String, Vec<RuleEntry>> = serde_json::from_str(raw)?;
    parsed
        .into_iter()
        .map(|(key, entries)| {
            let pair: AssetPair = key.parse()?;
            let rules = entries
                .into_iter()
                .map(|e| (e.offset, e.tick_size.map(TickSize::Enabled).unwrap_or(TickSize::Disabled)))
                .collect();
            Ok((pair, MatchingRules::new(rules)))
        })
        .collect()
}

fn parse_snapshot_intervals(raw: &str) -> anyhow::Result<HashMap<AssetPair, u64>> {
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let parsed: HashMap<String, u64> = serde_json::from_str(raw)?;
    parsed.into_iter().map(|(key, interval)| Ok((key.parse::<AssetPair>()?, interval))).collect()
}
