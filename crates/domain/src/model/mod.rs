//! Data structures shared between the HTTP layer and the store adapters.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use hex::{decode as hex_decode, encode as hex_encode};
use metrics::{counter, gauge, histogram};
use strum_macros::AsRefStr;

/// Name of the single key holding the counter.
pub const COUNTER_KEY: &str = "counter";

/// Whether an endpoint goes through the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointClass {
    Limited,
    Exempt,
}

/// Process-local belief about store reachability. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityState {
    connected: Arc<AtomicBool>,
}

impl ConnectivityState {
    pub fn new(connected: bool) -> Self {
        let state = Self::default();
        state.set(connected);
        state
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.set(true);
    }

    pub fn mark_disconnected(&self) {
        self.set(false);
    }

    /// Stores the new state, mirrors it into `redis_connection_status`, and
    /// returns the previous one.
    pub fn set(&self, connected: bool) -> bool {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        gauge!("redis_connection_status").set(if connected { 1.0 } else { 0.0 });
        previous
    }
}

/// What happened to one request, consumed only by metrics and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub method: String,
    pub endpoint: String,
    pub status: u16,
    pub duration: Option<Duration>,
    pub counter: Option<i64>,
}

impl RequestOutcome {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            status,
            duration: None,
            counter: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_counter(mut self, counter: Option<i64>) -> Self {
        self.counter = counter;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn record(&self) {
        counter!(
            "http_requests_total",
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => self.status.to_string()
        )
        .increment(1);

        if let Some(duration) = self.duration {
            histogram!(
                "http_request_duration_seconds",
                "method" => self.method.clone(),
                "endpoint" => self.endpoint.clone()
            )
            .record(duration.as_secs_f64());
        }

        if let (true, Some(value)) = (self.is_success(), self.counter) {
            gauge!("counter_value").set(value as f64);
        }
    }
}

/// W3C-style trace and span identifiers carried on request spans and log
/// lines.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
}

impl TraceContext {
    pub fn generate() -> Self {
        Self {
            trace_id: random_id(),
            span_id: random_id(),
        }
    }

    /// Continues the trace named by a `traceparent` header
    /// (`00-<trace-id>-<parent-id>-<flags>`) with a fresh span id. Returns
    /// `None` for malformed or all-zero ids.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let parent = parts.next()?;
        let flags = parts.next()?;
        if version.len() != 2 || version.eq_ignore_ascii_case("ff") || flags.len() != 2 {
            return None;
        }
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if parent.len() != 16 || hex_decode(parent).is_err() {
            return None;
        }

        let decoded = hex_decode(trace).ok()?;
        let trace_id: [u8; 16] = decoded.try_into().ok()?;
        if trace_id.iter().all(|byte| *byte == 0) {
            return None;
        }

        Some(Self {
            trace_id,
            span_id: random_id(),
        })
    }

    pub fn trace_id(&self) -> String {
        hex_encode(self.trace_id)
    }

    pub fn span_id(&self) -> String {
        hex_encode(self.span_id)
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .finish()
    }
}

fn random_id<const N: usize>() -> [u8; N] {
    let mut buf = [0_u8; N];
    if getrandom::fill(&mut buf).is_err() {
        // OS entropy unavailable: derive from the clock instead.
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes();
        for (idx, byte) in buf.iter_mut().enumerate() {
            *byte = nanos[idx % nanos.len()] ^ (idx as u8).wrapping_mul(31);
        }
    }
    if buf.iter().all(|byte| *byte == 0) {
        buf[N - 1] = 1;
    }
    buf
}
