use std::sync::{Arc, Mutex, PoisonError};

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{get_optional_var, hydrate_env_file};

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Histogram buckets (seconds) shared by request and store latencies.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resource labels stamped on every exported metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLabels {
    pub service_name: String,
    pub service_version: String,
    pub service_namespace: String,
    pub deployment_environment: String,
}

impl ServiceLabels {
    pub fn from_env() -> Self {
        let read = |key: &str, default: &str| {
            get_optional_var(key).unwrap_or_else(|| default.to_string())
        };
        Self {
            service_name: read("OTEL_SERVICE_NAME", "counter-service"),
            service_version: read("OTEL_SERVICE_VERSION", "1.0.0"),
            service_namespace: read("OTEL_SERVICE_NAMESPACE", "prod"),
            deployment_environment: read("OTEL_DEPLOYMENT_ENVIRONMENT", "production"),
        }
    }

    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("service_name", self.service_name.as_str()),
            ("service_version", self.service_version.as_str()),
            ("service_namespace", self.service_namespace.as_str()),
            ("deployment_environment", self.deployment_environment.as_str()),
        ]
    }
}

impl Default for ServiceLabels {
    fn default() -> Self {
        Self {
            service_name: "counter-service".to_string(),
            service_version: "1.0.0".to_string(),
            service_namespace: "prod".to_string(),
            deployment_environment: "production".to_string(),
        }
    }
}

/// Shared observability options for the binary.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    log_format: LogFormat,
    labels: ServiceLabels,
    export_endpoint: Option<String>,
    export_headers: Option<String>,
}

impl TelemetryConfig {
    /// Loads `LOG_LEVEL`, `LOG_FORMAT` and the `OTEL_*` variables. Missing or
    /// unparsable entries fall back to defaults so the service always boots.
    pub fn from_env() -> Self {
        let _ = hydrate_env_file();

        let log_format = get_optional_var("LOG_FORMAT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogFormat::Text);

        Self {
            log_filter: get_optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            labels: ServiceLabels::from_env(),
            export_endpoint: get_optional_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            export_headers: get_optional_var("OTEL_EXPORTER_OTLP_HEADERS"),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn labels(&self) -> &ServiceLabels {
        &self.labels
    }

    pub fn export_endpoint(&self) -> Option<&str> {
        self.export_endpoint.as_deref()
    }

    pub fn export_headers(&self) -> Option<&str> {
        self.export_headers.as_deref()
    }
}

/// Handle returned after telemetry initialization; renders the scrape body.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Option<Arc<PrometheusHandle>>,
    last_exposition: Arc<Mutex<String>>,
    labels: ServiceLabels,
}

impl TelemetryGuard {
    /// Guard with no metrics recorder behind it; every render fails and
    /// callers serve [`TelemetryGuard::last_exposition`].
    pub fn detached(labels: ServiceLabels) -> Self {
        Self {
            metrics: None,
            last_exposition: Arc::new(Mutex::new(String::new())),
            labels,
        }
    }

    pub fn render_metrics(&self) -> Result<String, TelemetryError> {
        let handle = self
            .metrics
            .as_ref()
            .ok_or(TelemetryError::RecorderUnavailable)?;
        let body = handle.render();
        *self
            .last_exposition
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = body.clone();
        Ok(body)
    }

    /// Last successfully rendered exposition, empty if none yet.
    pub fn last_exposition(&self) -> String {
        self.last_exposition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn labels(&self) -> &ServiceLabels {
        &self.labels
    }
}

/// Wires up tracing and the Prometheus recorder once per process. A recorder
/// that fails to install is logged and leaves the guard detached.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;

    let metrics = match install_metrics(config) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "metrics recorder unavailable, serving fallback /metrics");
            None
        }
    };

    match config.export_endpoint() {
        Some(endpoint) => info!(
            endpoint,
            headers = config.export_headers().is_some(),
            "telemetry export endpoint configured"
        ),
        None => info!("no telemetry export endpoint configured, emitting locally"),
    }

    Ok(TelemetryGuard {
        metrics,
        last_exposition: Arc::new(Mutex::new(String::new())),
        labels: config.labels().clone(),
    })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match config.log_format() {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init(),
        };
        installed.map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new()
                .set_buckets(LATENCY_BUCKETS)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            for (key, value) in config.labels().pairs() {
                builder = builder.add_global_label(key, value);
            }

            let handle = builder
                .install_recorder()
                .map(Arc::new)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_metrics();
            Ok(handle)
        })
        .cloned()
}

fn describe_metrics() {
    describe_counter!("http_requests_total", Unit::Count, "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_gauge!("counter_value", Unit::Count, "Current counter value");
    describe_gauge!(
        "redis_connection_status",
        "Redis connection status (1=connected, 0=disconnected)"
    );
    describe_counter!(
        "redis_operations_total",
        Unit::Count,
        "Total number of Redis operations"
    );
    describe_histogram!(
        "redis_operation_duration_seconds",
        Unit::Seconds,
        "Redis operation duration in seconds"
    );
    describe_counter!(
        "rate_limit_decisions_total",
        Unit::Count,
        "Rate limiter decisions by result"
    );
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
    #[error("metrics recorder is not installed")]
    RecorderUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "LOG_LEVEL",
        "LOG_FORMAT",
        "OTEL_SERVICE_NAME",
        "OTEL_SERVICE_VERSION",
        "OTEL_SERVICE_NAMESPACE",
        "OTEL_DEPLOYMENT_ENVIRONMENT",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "OTEL_EXPORTER_OTLP_HEADERS",
    ];

    fn reset_env() {
        env::set_var("COUNTER_SKIP_DOTENV", "1");
        for key in VARS {
            env::remove_var(key);
        }
    }

    #[test]
    fn telemetry_config_uses_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();

        let cfg = TelemetryConfig::from_env();
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.log_format(), LogFormat::Text);
        assert_eq!(cfg.labels(), &ServiceLabels::default());
        assert_eq!(cfg.export_endpoint(), None);
    }

    #[test]
    fn telemetry_config_reads_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        env::set_var("LOG_LEVEL", "debug");
        env::set_var("LOG_FORMAT", "JSON");
        env::set_var("OTEL_SERVICE_NAME", "counter-test");
        env::set_var("OTEL_DEPLOYMENT_ENVIRONMENT", "staging");
        env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318");

        let cfg = TelemetryConfig::from_env();
        assert_eq!(cfg.log_filter(), "debug");
        assert_eq!(cfg.log_format(), LogFormat::Json);
        assert_eq!(cfg.labels().service_name, "counter-test");
        assert_eq!(cfg.labels().service_version, "1.0.0");
        assert_eq!(cfg.labels().deployment_environment, "staging");
        assert_eq!(cfg.export_endpoint(), Some("http://collector:4318"));

        reset_env();
    }

    #[test]
    fn unknown_log_format_falls_back_to_text() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        env::set_var("LOG_FORMAT", "xml");
        assert_eq!(TelemetryConfig::from_env().log_format(), LogFormat::Text);
        reset_env();
    }

    #[test]
    fn detached_guard_reports_missing_recorder() {
        let guard = TelemetryGuard::detached(ServiceLabels::default());
        assert!(matches!(
            guard.render_metrics(),
            Err(TelemetryError::RecorderUnavailable)
        ));
        assert_eq!(guard.last_exposition(), "");
    }
}
