use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Common result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unreachable, timed out, refused, or rejected our credentials.
    #[error("store unreachable: {0}")]
    Connectivity(String),
    #[error("{0}")]
    Unexpected(String),
}

impl StoreError {
    pub fn connectivity(err: impl std::fmt::Display) -> Self {
        Self::Connectivity(err.to_string())
    }

    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        Self::Unexpected(err.to_string())
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

/// The shared counter. Implementations must issue exactly one atomic
/// command per increment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `0` when the key was never written.
    async fn get_counter(&self) -> StoreResult<i64>;
    /// Adds one and returns the new value.
    async fn increment_counter(&self) -> StoreResult<i64>;
    async fn ping(&self) -> StoreResult<()>;
}

/// Fixed-window hit counting for the rate limiter.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Atomically increments the bucket under `key` and returns the count
    /// including this hit. The bucket may be dropped once `window` elapses.
    async fn hit(&self, key: &str, window: Duration) -> StoreResult<u64>;
}
