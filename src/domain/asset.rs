//! Asset identifiers and asset pairs.

use crate::error::MatcherError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 32-byte digest identifying an issued asset, or the chain's native coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetId {
    Native,
    Issued([u8; 32]),
}

impl AssetId {
    pub fn issued_from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest: [u8; 32] = hasher.finalize().into();
        AssetId::Issued(digest)
    }

    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => write!(f, "WAVES"),
            AssetId::Issued(bytes) => write!(f, "{}", hex::encode(bytes)),
        }
    }
}

impl FromStr for AssetId {
    type Err = MatcherError;

    /// Parses the same wire form `Display` produces: `"WAVES"` for the
    /// native asset, or the hex-encoded 32-byte id otherwise.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("WAVES") {
            return Ok(AssetId::Native);
        }
        let bytes = hex::decode(s).map_err(|e| MatcherError::Invalid(format!("malformed asset id: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| MatcherError::Invalid("asset id must be 32 bytes".into()))?;
        Ok(AssetId::Issued(arr))
    }
}

/// An ordered pair of assets defining a market: `amountAsset` is traded in
/// units of `priceAsset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub amount_asset: AssetId,
    pub price_asset: AssetId,
}

impl AssetPair {
    pub fn new(amount_asset: AssetId, price_asset: AssetId) -> Self {
        Self {
            amount_asset,
            price_asset,
        }
    }

    /// Stable string key used for log keys, file names, and HTTP routes.
    pub fn key(&self) -> String {
        format!("{}-{}", self.amount_asset, self.price_asset)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.amount_asset, self.price_asset)
    }
}

impl FromStr for AssetPair {
    type Err = MatcherError;

    /// Parses the `key()` form: `"<amountAsset>-<priceAsset>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (amount, price) = s
            .split_once('-')
            .ok_or_else(|| MatcherError::Invalid(format!("malformed pair key {s}, expected AMOUNT-PRICE")))?;
        Ok(AssetPair::new(amount.parse()?, price.parse()?))
    }
}

/// The implicit price-constant multiplier used to normalize prices to
/// integer units, made explicit per spec.md's design notes.
pub const PRICE_CONSTANT: u64 = 100_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_displays_as_waves() {
        assert_eq!(AssetId::Native.to_string(), "WAVES");
    }

    #[test]
    fn pair_key_is_stable() {
        let a = AssetId::issued_from_bytes(b"asset-a");
        let pair = AssetPair::new(a, AssetId::Native);
        assert_eq!(pair.key(), format!("{}-WAVES", a));
    }
}
