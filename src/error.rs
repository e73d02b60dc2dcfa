//! Matcher-wide error kinds (spec.md §7) and their mapping to process exit codes.

use thiserror::Error;

/// Error kinds surfaced to callers of the core. Client-facing variants map
/// to 4xx HTTP statuses at the API layer; `InternalInvariant` is fatal.
#[derive(Debug, Clone, Error)]
pub enum MatcherError {
    #[error("invalid order: {0}")]
    Invalid(String),

    #[error("event queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("insufficient balance: needed {needed}, spendable {spendable}")]
    InsufficientBalance { needed: u128, spendable: u128 },

    #[error("duplicate order")]
    DuplicateOrder,

    #[error("unknown asset pair")]
    UnknownPair,

    #[error("script denied: {0}")]
    ScriptDenied(String),

    #[error("script error: {0}")]
    ScriptError(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl MatcherError {
    /// Process exit code for errors fatal at startup, per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            MatcherError::QueueUnavailable(_) => 3,
            MatcherError::Timeout(_) => 2,
            _ => 1,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, MatcherError::InternalInvariant(_))
    }
}

impl From<std::io::Error> for MatcherError {
    fn from(e: std::io::Error) -> Self {
        MatcherError::QueueUnavailable(e.to_string())
    }
}

impl From<bincode::Error> for MatcherError {
    fn from(e: bincode::Error) -> Self {
        MatcherError::InternalInvariant(format!("codec error: {e}"))
    }
}

impl From<rocksdb::Error> for MatcherError {
    fn from(e: rocksdb::Error) -> Self {
        MatcherError::QueueUnavailable(format!("kv store error: {e}"))
    }
}
