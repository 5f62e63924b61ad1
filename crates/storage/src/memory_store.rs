use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use counter_domain::storage::{CounterStore, StoreError, StoreResult};

/// Process-local counter. Can be switched offline to behave like an
/// unreachable store, or corrupted to behave like a key holding garbage.
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    value: Arc<AtomicI64>,
    online: Arc<AtomicBool>,
    corrupt: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_value(0)
    }

    pub fn with_value(value: i64) -> Self {
        Self {
            value: Arc::new(AtomicI64::new(value)),
            online: Arc::new(AtomicBool::new(true)),
            corrupt: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::Release);
    }

    /// Number of operations attempted against the store, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if !self.online.load(Ordering::Acquire) {
            return Err(StoreError::connectivity("connection refused"));
        }
        if self.corrupt.load(Ordering::Acquire) {
            return Err(StoreError::unexpected(
                "value is not an integer or out of range",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get_counter(&self) -> StoreResult<i64> {
        self.check()?;
        Ok(self.value())
    }

    async fn increment_counter(&self) -> StoreResult<i64> {
        self.check()?;
        Ok(self.value.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::connectivity("connection refused"))
        }
    }
}
