//! Core data model: assets, orders, and the events that mutate order books.

pub mod asset;
pub mod events;
pub mod order;

pub use asset::{AssetId, AssetPair, PRICE_CONSTANT};
pub use events::{Address, ExchangeTransaction, MarketStatus, QueueEvent, QueueEventWithMeta, Trade};
pub use order::{LimitOrder, Order, OrderId, OrderStatus, OrderVersion, Side};
