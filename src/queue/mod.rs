//! The durable, offset-ordered event queue (spec.md §5).
//!
//! Grounded on `backtest_v2/queue.rs`'s `EventQueue`: a monotone sequence
//! counter assigned at push time, diagnostics counters for inserted/popped
//! totals. That queue is an in-memory priority merge for backtests; this
//! one is a durable, single append-only log with two interchangeable
//! transports (`local`, `remote`), matching spec.md's requirement that the
//! queue be swappable without touching matching logic.

pub mod local;
pub mod remote;

use crate::domain::QueueEventWithMeta;
use crate::error::MatcherError;
use async_trait::async_trait;

/// Durable, append-only, offset-ordered log of matcher commands. All
/// implementations must guarantee: offsets are assigned in append order
/// starting at 0, are contiguous, and consumption resumes exactly from a
/// requested offset (spec.md §5).
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Appends an event, returning its assigned offset.
    async fn append(&self, event: crate::domain::QueueEvent, timestamp: u64) -> Result<u64, MatcherError>;

    /// The offset of the most recently appended event, or `None` if empty.
    async fn last_event_offset(&self) -> Result<Option<u64>, MatcherError>;

    /// Starts consuming from `from_offset` (inclusive), delivering events
    /// in strict offset order to `handler`. Returns once the queue is
    /// closed or the handler returns an error.
    async fn start_consume(
        &self,
        from_offset: u64,
        handler: Box<dyn Fn(QueueEventWithMeta) -> Result<(), MatcherError> + Send + Sync>,
    ) -> Result<(), MatcherError>;

    async fn close(&self) -> Result<(), MatcherError>;
}
