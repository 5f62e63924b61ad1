use std::sync::Arc;

use counter_domain::config::TrustedProxies;
use counter_domain::model::ConnectivityState;
use counter_domain::rate_limit::RateLimiter;
use counter_domain::services::telemetry::TelemetryGuard;
use counter_domain::storage::CounterStore;

#[derive(Clone)]
pub struct AppState {
    store: Option<Arc<dyn CounterStore>>,
    connectivity: ConnectivityState,
    limiter: RateLimiter,
    telemetry: TelemetryGuard,
    trusted_proxies: Arc<TrustedProxies>,
}

impl AppState {
    pub fn new(
        store: Option<Arc<dyn CounterStore>>,
        connectivity: ConnectivityState,
        limiter: RateLimiter,
        telemetry: TelemetryGuard,
        trusted_proxies: TrustedProxies,
    ) -> Self {
        Self {
            store,
            connectivity,
            limiter,
            telemetry,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// The store client, if the startup connect succeeded.
    pub fn store(&self) -> Option<&Arc<dyn CounterStore>> {
        self.store.as_ref()
    }

    /// The store client when it exists and is believed reachable.
    pub fn available_store(&self) -> Option<&Arc<dyn CounterStore>> {
        self.store
            .as_ref()
            .filter(|_| self.connectivity.is_connected())
    }

    pub fn connectivity(&self) -> &ConnectivityState {
        &self.connectivity
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    pub fn trusted_proxies(&self) -> &TrustedProxies {
        self.trusted_proxies.as_ref()
    }
}
