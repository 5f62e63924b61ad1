use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use moka::sync::Cache;

use crate::storage::{StoreResult, WindowCounter};

/// In-process window buckets. Used when no shared backend is configured and
/// as the fallback when the shared backend is unreachable.
///
/// The cache is bounded. When more buckets are live than `capacity`, moka
/// evicts some before their window ends and the affected clients are counted
/// from zero again, so size it to at least active clients times quotas
/// (`RATELIMIT_MEMORY_CAPACITY`).
#[derive(Debug, Clone)]
pub struct MemoryWindowCounter {
    buckets: Cache<String, Arc<AtomicU64>>,
}

impl MemoryWindowCounter {
    pub const DEFAULT_CAPACITY: u64 = 100_000;

    /// `ttl` must cover the longest window the buckets are used for.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        Self {
            buckets: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity.max(1))
                .build(),
        }
    }

    pub fn increment(&self, key: &str) -> u64 {
        let bucket = self
            .buckets
            .get_with_by_ref(key, || Arc::new(AtomicU64::new(0)));
        bucket.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[async_trait]
impl WindowCounter for MemoryWindowCounter {
    async fn hit(&self, key: &str, _window: Duration) -> StoreResult<u64> {
        Ok(self.increment(key))
    }
}
