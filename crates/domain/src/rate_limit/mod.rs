//! Per-client fixed-window rate limiting.
//!
//! Every quota of the policy gets its own bucket per client and window:
//! `LIMITER/<client>/<limit>/<window_secs>/<window_index>`. A hit is a single
//! atomic increment-and-read against the bucket, so concurrent workers sharing
//! one backend never undercount. Quotas are checked in policy order; the first
//! exceeded quota denies and later quotas are left untouched.

mod memory;
mod policy;

use std::{fmt, sync::Arc, time::Duration};

use metrics::counter;
use tracing::warn;

pub use memory::MemoryWindowCounter;
pub use policy::{PolicyError, Quota, RateLimitPolicy, MAX_WINDOW_SECS};

use crate::{
    clock::Clock,
    model::{ConnectivityState, EndpointClass},
    storage::WindowCounter,
};

/// Prefix keeping limiter buckets apart from the counter key.
pub const KEY_PREFIX: &str = "LIMITER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied { quota: Quota, retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

struct SharedBackend {
    counter: Arc<dyn WindowCounter>,
    connectivity: ConnectivityState,
}

#[derive(Clone)]
pub struct RateLimiter {
    policy: Arc<RateLimitPolicy>,
    shared: Option<Arc<SharedBackend>>,
    local: MemoryWindowCounter,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("shared", &self.shared.is_some())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter counting in process memory only.
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let local = MemoryWindowCounter::new(bucket_ttl(&policy));
        Self {
            policy: Arc::new(policy),
            shared: None,
            local,
            clock,
        }
    }

    /// Bounds the in-memory buckets (one per client and quota). Once more
    /// buckets are live than this, the least used ones are evicted and those
    /// clients start their window from zero again.
    pub fn with_local_capacity(mut self, capacity: u64) -> Self {
        self.local = MemoryWindowCounter::with_capacity(bucket_ttl(&self.policy), capacity);
        self
    }

    /// Counts in `counter` (shared between processes) while `connectivity`
    /// says the store is up; falls back to process memory otherwise.
    pub fn with_shared_backend(
        mut self,
        counter: Arc<dyn WindowCounter>,
        connectivity: ConnectivityState,
    ) -> Self {
        self.shared = Some(Arc::new(SharedBackend {
            counter,
            connectivity,
        }));
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    pub async fn allow(&self, client: &str, class: EndpointClass) -> RateLimitDecision {
        if class == EndpointClass::Exempt {
            return RateLimitDecision::Allowed;
        }

        let now = self.clock.now_millis();
        for quota in self.policy.quotas() {
            let key = bucket_key(client, quota, quota.window_index(now));
            let hits = self.hit(&key, quota.window()).await;
            if hits > quota.limit() {
                counter!("rate_limit_decisions_total", "result" => "denied").increment(1);
                return RateLimitDecision::Denied {
                    quota: *quota,
                    retry_after: quota.remaining_in_window(now),
                };
            }
        }

        counter!("rate_limit_decisions_total", "result" => "allowed").increment(1);
        RateLimitDecision::Allowed
    }

    async fn hit(&self, key: &str, window: Duration) -> u64 {
        if let Some(shared) = &self.shared {
            if shared.connectivity.is_connected() {
                match shared.counter.hit(key, window).await {
                    Ok(hits) => return hits,
                    Err(err) => {
                        counter!("rate_limit_backend_errors_total").increment(1);
                        warn!(error = %err, "rate limit backend failed, counting in memory");
                        if err.is_connectivity() {
                            shared.connectivity.mark_disconnected();
                        }
                    }
                }
            }
        }
        self.local.increment(key)
    }
}

/// Keeps every bucket alive for at least its whole window.
fn bucket_ttl(policy: &RateLimitPolicy) -> Duration {
    policy.longest_window() * 2
}

fn bucket_key(client: &str, quota: &Quota, index: i64) -> String {
    format!(
        "{KEY_PREFIX}/{client}/{}/{}/{index}",
        quota.limit(),
        quota.window_secs()
    )
}
