//! The partitioned single-writer actor model (spec.md §4, §5): one
//! `OrderBookActor` per pair, one `AddressActor` per address, each driven
//! by a `tokio::sync::mpsc` mailbox so no state crosses actor boundaries
//! except through messages. Grounded on `main.rs`'s
//! `tokio::sync::mpsc::channel` + `tokio::spawn` wiring style rather than
//! an external actor-framework dependency.

pub mod address_actor;
pub mod matcher_actor;
pub mod orderbook_actor;

pub use address_actor::{AddressActor, AddressActorHandle};
pub use matcher_actor::{MatcherActor, MatcherHandle};
pub use orderbook_actor::{OrderBookActor, OrderBookActorHandle};
