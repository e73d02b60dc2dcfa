//! The HTTP surface reflected in spec.md §6: place, cancel, status by id,
//! order book by pair, market status, balances, and order history.
//!
//! Grounded on `api/routes.rs`'s axum `Router`/`State` extraction style
//! and `middleware/logging.rs`, reused for request logging. The HTTP
//! layer is a thin shape over `MatcherActor` and `OrderValidator`; all
//! matching and reservation logic lives below it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_mw,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::actors::matcher_actor::{MatcherHandle, MatcherStatus};
use crate::book::rules::TickSize;
use crate::domain::{Address, AssetId, AssetPair, MarketStatus, Order, OrderId};
use crate::error::MatcherError;
use crate::queue::EventQueue;
use crate::store::{RateCache, SubmissionRateLimiter};
use crate::validator::OrderValidator;

/// Shared state reachable from every handler. Cheaply `Clone`, per axum's
/// `State` extractor convention; every field is already `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    pub matcher: MatcherHandle,
    pub queue: Arc<dyn EventQueue>,
    pub validator: Arc<OrderValidator>,
    pub submission_limits: Arc<SubmissionRateLimiter>,
    pub rates: Arc<RateCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/matcher/orders", post(place_order))
        .route("/matcher/orders/:order_id", get(order_status).delete(cancel_order))
        .route("/matcher/orderbook/:amount_asset/:price_asset", get(order_book))
        .route("/matcher/orderbook/:amount_asset/:price_asset/status", get(market_status))
        .route("/matcher/balance/:address/:asset", get(balance))
        .route("/matcher/history/:address", get(history))
        .route("/matcher/rates/:asset", get(rate).put(set_rate))
        .route("/health", get(health))
        .layer(axum_mw::from_fn_with_state(state.clone(), reject_while_starting))
        .with_state(state)
}

/// Fails every route closed with 503 while the matcher is replaying
/// (spec.md §7, §9's first Open Question resolution). `/health` is exempt
/// so operators can still probe liveness during startup.
async fn reject_while_starting(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum_mw::Next,
) -> Response {
    if request.uri().path() != "/health" && state.matcher.status() != MatcherStatus::Working {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody { error: "starting".into() })).into_response();
    }
    next.run(request).await
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.matcher.status() {
        MatcherStatus::Starting => "starting",
        MatcherStatus::Working => "working",
    };
    Json(serde_json::json!({ "status": status }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for MatcherError {
    fn into_response(self) -> Response {
        let status = match &self {
            MatcherError::Invalid(_) | MatcherError::UnknownPair | MatcherError::DuplicateOrder => {
                StatusCode::BAD_REQUEST
            }
            MatcherError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MatcherError::ScriptDenied(_) => StatusCode::FORBIDDEN,
            MatcherError::ScriptError(_) => StatusCode::BAD_GATEWAY,
            MatcherError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MatcherError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            MatcherError::InternalInvariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Wire schema for order placement: amounts and prices are plain integers
/// in the asset's smallest unit, per spec.md §6. `owner`/`signature` are
/// hex-encoded secp256k1 bytes; the wallet/key layer that produces them is
/// an external collaborator.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub owner: String,
    pub amount_asset: String,
    pub price_asset: String,
    pub side: OrderSideWire,
    pub amount: u64,
    pub price: u64,
    pub matcher_fee: u64,
    pub fee_asset: String,
    pub timestamp: u64,
    pub expiration: u64,
    pub version: u8,
    pub signature: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OrderSideWire {
    Buy,
    Sell,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub status: &'static str,
}

fn parse_asset(s: &str) -> Result<AssetId, MatcherError> {
    s.parse()
}

fn parse_request_order(req: PlaceOrderRequest) -> Result<Order, MatcherError> {
    let owner_bytes = hex::decode(&req.owner).map_err(|e| MatcherError::Invalid(format!("bad owner: {e}")))?;
    let owner = secp256k1::PublicKey::from_slice(&owner_bytes)
        .map_err(|e| MatcherError::Invalid(format!("bad owner key: {e}")))?;
    let signature_bytes = hex::decode(&req.signature).map_err(|e| MatcherError::Invalid(format!("bad signature: {e}")))?;
    let signature = secp256k1::ecdsa::Signature::from_compact(&signature_bytes)
        .map_err(|e| MatcherError::Invalid(format!("bad signature: {e}")))?;

    let order = Order {
        id: OrderId([0u8; 32]),
        owner,
        pair: AssetPair::new(parse_asset(&req.amount_asset)?, parse_asset(&req.price_asset)?),
        side: match req.side {
            OrderSideWire::Buy => crate::domain::Side::Buy,
            OrderSideWire::Sell => crate::domain::Side::Sell,
        },
        amount: req.amount,
        price: req.price,
        matcher_fee: req.matcher_fee,
        fee_asset: parse_asset(&req.fee_asset)?,
        timestamp: req.timestamp,
        expiration: req.expiration,
        version: crate::domain::OrderVersion(req.version),
        signature,
    };
    let id = order.derive_id();
    Ok(Order { id, ..order })
}

async fn place_order(
    State(state): State<AppState>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), MatcherError> {
    let order = parse_request_order(req)?;
    let now = now_millis();
    let address = order.owner_address();
    if !state.submission_limits.try_acquire(address, now) {
        return Err(MatcherError::Invalid("submission rate limit exceeded".into()));
    }

    state.validator.validate(&order, now).await?;

    let order_id = order.id;
    state.matcher.submit_order(order, state.queue.as_ref(), now).await?;

    Ok((
        StatusCode::OK,
        Json(PlaceOrderResponse { order_id: order_id.to_string(), status: "Accepted" }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub by: String,
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<StatusCode, MatcherError> {
    let order_id = OrderId::from_str(&order_id)?;
    let by = parse_address(&req.by)?;
    let now = now_millis();
    state.matcher.submit_cancel(order_id, by, state.queue.as_ref(), now).await?;
    Ok(StatusCode::ACCEPTED)
}

fn parse_address(s: &str) -> Result<Address, MatcherError> {
    let bytes = hex::decode(s).map_err(|e| MatcherError::Invalid(format!("bad address: {e}")))?;
    let arr: [u8; 20] = bytes.try_into().map_err(|_| MatcherError::Invalid("address must be 20 bytes".into()))?;
    Ok(Address(arr))
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
pub enum OrderStatusResponse {
    Accepted,
    PartiallyFilled { filled: u64, filled_fee: u64 },
    Filled { filled: u64, filled_fee: u64 },
    Cancelled { filled: u64, filled_fee: u64 },
    NotFound,
}

impl From<Option<crate::domain::OrderStatus>> for OrderStatusResponse {
    fn from(status: Option<crate::domain::OrderStatus>) -> Self {
        use crate::domain::OrderStatus as S;
        match status {
            None => OrderStatusResponse::NotFound,
            Some(S::Accepted) => OrderStatusResponse::Accepted,
            Some(S::PartiallyFilled { filled, filled_fee }) => OrderStatusResponse::PartiallyFilled { filled, filled_fee },
            Some(S::Filled { filled, filled_fee }) => OrderStatusResponse::Filled { filled, filled_fee },
            Some(S::Cancelled { filled, filled_fee }) => OrderStatusResponse::Cancelled { filled, filled_fee },
        }
    }
}

async fn order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderStatusResponse>, MatcherError> {
    let order_id = OrderId::from_str(&order_id)?;
    let status = state.matcher.order_status(order_id).await?;
    Ok(Json(status.into()))
}

#[derive(Debug, Serialize)]
pub struct OrderBookLevel {
    pub price: u64,
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct OrderBookResponse {
    pub pair: String,
    pub offset: u64,
    pub aggregation: Option<u64>,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

async fn order_book(
    State(state): State<AppState>,
    Path((amount_asset, price_asset)): Path<(String, String)>,
) -> Result<Json<OrderBookResponse>, MatcherError> {
    let pair = AssetPair::new(parse_asset(&amount_asset)?, parse_asset(&price_asset)?);
    let snap = state.matcher.order_book(&pair).await?;

    let collapse = |orders: &[crate::book::snapshot::SnapshotOrder]| -> Vec<OrderBookLevel> {
        let mut by_price: std::collections::BTreeMap<u64, u64> = std::collections::BTreeMap::new();
        for o in orders {
            *by_price.entry(o.order.price).or_insert(0) += o.amount_remaining;
        }
        by_price.into_iter().map(|(price, amount)| OrderBookLevel { price, amount }).collect()
    };

    Ok(Json(OrderBookResponse {
        pair: pair.key(),
        offset: snap.offset,
        aggregation: match snap.aggregation {
            TickSize::Disabled => None,
            TickSize::Enabled(t) => Some(t),
        },
        bids: collapse(&snap.bids),
        asks: collapse(&snap.asks),
    }))
}

#[derive(Debug, Serialize)]
pub struct MarketStatusResponse {
    pub last_trade_price: Option<u64>,
    pub last_trade_amount: Option<u64>,
    pub best_bid: Option<u64>,
    pub best_ask: Option<u64>,
    pub aggregation: Option<u64>,
}

impl From<MarketStatus> for MarketStatusResponse {
    fn from(s: MarketStatus) -> Self {
        Self {
            last_trade_price: s.last_trade.map(|t| t.price),
            last_trade_amount: s.last_trade.map(|t| t.amount),
            best_bid: s.best_bid,
            best_ask: s.best_ask,
            aggregation: match s.aggregation {
                TickSize::Disabled => None,
                TickSize::Enabled(t) => Some(t),
            },
        }
    }
}

async fn market_status(
    State(state): State<AppState>,
    Path((amount_asset, price_asset)): Path<(String, String)>,
) -> Result<Json<MarketStatusResponse>, MatcherError> {
    let pair = AssetPair::new(parse_asset(&amount_asset)?, parse_asset(&price_asset)?);
    let status = state.matcher.market_status(&pair).await?;
    Ok(Json(status.into()))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub reserved: String,
}

async fn balance(
    State(state): State<AppState>,
    Path((address, asset)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, MatcherError> {
    let address = parse_address(&address)?;
    let asset = parse_asset(&asset)?;
    let reserved = state.matcher.balance_for(address, asset).await?;
    Ok(Json(BalanceResponse { reserved: reserved.to_string() }))
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub order_id: String,
    pub pair: String,
    pub status: OrderStatusResponse,
}

async fn history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, MatcherError> {
    let address = parse_address(&address)?;
    let records = state.matcher.history_for(address).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| HistoryEntry { order_id: r.order.id.to_string(), pair: r.order.pair.key(), status: Some(r.status).into() })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub asset: String,
    pub rate: Option<u64>,
}

async fn rate(State(state): State<AppState>, Path(asset): Path<String>) -> Result<Json<RateResponse>, MatcherError> {
    let asset_id = parse_asset(&asset)?;
    Ok(Json(RateResponse { asset, rate: state.rates.rate_of(&asset_id) }))
}

#[derive(Debug, Deserialize)]
pub struct SetRateRequest {
    pub rate: u64,
}

async fn set_rate(
    State(state): State<AppState>,
    Path(asset): Path<String>,
    Json(req): Json<SetRateRequest>,
) -> Result<StatusCode, MatcherError> {
    let asset_id = parse_asset(&asset)?;
    state.rates.set_rate(asset_id, req.rate)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_and_issued_assets() {
        assert_eq!(parse_asset("WAVES").unwrap(), AssetId::Native);
        let hex_id = hex::encode([1u8; 32]);
        assert_eq!(parse_asset(&hex_id).unwrap(), AssetId::Issued([1u8; 32]));
        assert!(parse_asset("not-hex").is_err());
    }
}
