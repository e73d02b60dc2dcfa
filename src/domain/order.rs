//! Orders, their lifecycle status, and the resting representation kept on a book.

use super::asset::{AssetId, AssetPair};
use super::events::Address;
use crate::error::MatcherError;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Side of a resting or incoming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order schema version, gating which validation/serialization rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderVersion(pub u8);

/// A 32-byte digest of an order's canonical bytes, used as its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub [u8; 32]);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for OrderId {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| MatcherError::Invalid(format!("malformed order id: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MatcherError::Invalid("order id must be 32 bytes".into()))?;
        Ok(OrderId(arr))
    }
}

/// An immutable order as submitted by a client and accepted onto the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: PublicKey,
    pub pair: AssetPair,
    pub side: Side,
    /// Positive integer amount in `amountAsset`'s smallest unit.
    pub amount: u64,
    /// Positive integer price in `priceAsset`'s smallest unit, normalized
    /// to `PRICE_CONSTANT`.
    pub price: u64,
    pub matcher_fee: u64,
    pub fee_asset: AssetId,
    pub timestamp: u64,
    pub expiration: u64,
    pub version: OrderVersion,
    pub signature: Signature,
}

impl Order {
    /// Structural invariants that must hold for any order admitted to the
    /// queue, independent of market or balance state (spec.md §3).
    pub fn check_static_invariants(&self) -> Result<(), MatcherError> {
        if self.amount == 0 {
            return Err(MatcherError::Invalid("amount must be positive".into()));
        }
        if self.price == 0 {
            return Err(MatcherError::Invalid("price must be positive".into()));
        }
        if self.expiration <= self.timestamp {
            return Err(MatcherError::Invalid(
                "expiration must be after timestamp".into(),
            ));
        }
        Ok(())
    }

    /// Canonical byte encoding used both to derive `id` and to verify
    /// `signature`. Field order is fixed and versioned.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.push(self.version.0);
        buf.extend_from_slice(&self.owner.serialize());
        buf.extend_from_slice(self.pair.amount_asset.to_string().as_bytes());
        buf.extend_from_slice(self.pair.price_asset.to_string().as_bytes());
        buf.push(matches!(self.side, Side::Buy) as u8);
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(&self.price.to_be_bytes());
        buf.extend_from_slice(&self.matcher_fee.to_be_bytes());
        buf.extend_from_slice(self.fee_asset.to_string().as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.expiration.to_be_bytes());
        buf
    }

    pub fn derive_id(&self) -> OrderId {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        OrderId(hasher.finalize().into())
    }

    /// Verifies `signature` against `owner` over the canonical bytes.
    pub fn verify_signature(&self) -> Result<(), MatcherError> {
        let secp = Secp256k1::verification_only();
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        let message = Message::from_digest(digest);
        secp.verify_ecdsa(&message, &self.signature, &self.owner)
            .map_err(|e| MatcherError::Invalid(format!("bad signature: {e}")))
    }

    /// The chain address derived from `owner`, used as the key for balance
    /// reservations and order history lookups.
    pub fn owner_address(&self) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(self.owner.serialize());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Address(bytes)
    }

    /// Required reservation for this order, per spec.md §4.5: `amount*price
    /// + fee` for Buy, `amount + fee` for Sell. Returns the primary
    /// reservation (in the traded asset) and, separately, the fee
    /// reservation, since `feeAsset` may differ from either side of the
    /// pair.
    pub fn required_reservation(&self) -> (AssetId, u128) {
        self.required_reservation_for(self.amount, self.matcher_fee)
    }

    /// Reservation still required for `amount_remaining`/`fee_remaining`,
    /// used to shrink a reservation proportionally as an order fills
    /// (spec.md §4.5's `ApplyFill` "decreases reservation accordingly").
    pub fn required_reservation_for(&self, amount_remaining: u64, fee_remaining: u64) -> (AssetId, u128) {
        let primary = match self.side {
            Side::Buy => {
                (self.pair.price_asset, (amount_remaining as u128) * (self.price as u128) / (super::asset::PRICE_CONSTANT as u128))
            }
            Side::Sell => (self.pair.amount_asset, amount_remaining as u128),
        };
        if self.fee_asset == primary.0 {
            (primary.0, primary.1 + fee_remaining as u128)
        } else {
            primary
        }
    }

    /// The fee reservation alone, when `feeAsset` differs from the side
    /// being reserved above (so callers must track it as a second bucket).
    pub fn fee_reservation_for(&self, fee_remaining: u64) -> Option<(AssetId, u128)> {
        let primary_asset = match self.side {
            Side::Buy => self.pair.price_asset,
            Side::Sell => self.pair.amount_asset,
        };
        if self.fee_asset == primary_asset {
            None
        } else {
            Some((self.fee_asset, fee_remaining as u128))
        }
    }
}

/// Terminal and non-terminal order status, monotonic per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Accepted,
    PartiallyFilled { filled: u64, filled_fee: u64 },
    Filled { filled: u64, filled_fee: u64 },
    Cancelled { filled: u64, filled_fee: u64 },
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled { .. } | OrderStatus::Cancelled { .. })
    }

    pub fn filled_amount(&self) -> u64 {
        match self {
            OrderStatus::Accepted => 0,
            OrderStatus::PartiallyFilled { filled, .. }
            | OrderStatus::Filled { filled, .. }
            | OrderStatus::Cancelled { filled, .. } => *filled,
        }
    }

    pub fn filled_fee(&self) -> u64 {
        match self {
            OrderStatus::Accepted => 0,
            OrderStatus::PartiallyFilled { filled_fee, .. }
            | OrderStatus::Filled { filled_fee, .. }
            | OrderStatus::Cancelled { filled_fee, .. } => *filled_fee,
        }
    }
}

/// A resting order on the book: the immutable `Order` plus mutable fill
/// progress. `amount_remaining` is monotonically non-increasing.
#[derive(Debug, Clone)]
pub struct LimitOrder {
    pub order: Order,
    pub amount_remaining: u64,
    pub fee_remaining: u64,
}

impl LimitOrder {
    pub fn new(order: Order) -> Self {
        let fee = order.matcher_fee;
        let amount = order.amount;
        Self {
            order,
            amount_remaining: amount,
            fee_remaining: fee,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.amount_remaining == 0
    }

    pub fn filled(&self) -> u64 {
        self.order.amount - self.amount_remaining
    }
}
