use std::time::Instant;

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use counter_domain::model::{EndpointClass, RequestOutcome};
use counter_domain::rate_limit::RateLimitDecision;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use tracing::{error, field, info, info_span, Instrument, Span};

use crate::request_context::{client_identity, trace_context};
use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterResponse {
    pub counter: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
enum CounterOperation {
    GetCounter,
    IncrementCounter,
}

impl CounterOperation {
    fn success_message(self) -> &'static str {
        match self {
            CounterOperation::GetCounter => "Counter retrieved successfully",
            CounterOperation::IncrementCounter => "Counter incremented successfully",
        }
    }

    fn log_message(self) -> &'static str {
        match self {
            CounterOperation::GetCounter => "Counter retrieved",
            CounterOperation::IncrementCounter => "Counter incremented",
        }
    }
}

pub async fn get_counter_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    serve_counter(&req, &state, CounterOperation::GetCounter).await
}

pub async fn increment_counter_handler(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    serve_counter(&req, &state, CounterOperation::IncrementCounter).await
}

async fn serve_counter(
    req: &HttpRequest,
    state: &AppState,
    operation: CounterOperation,
) -> Result<HttpResponse, ApiError> {
    let started = Instant::now();
    let trace = trace_context(req);
    let trace_id = trace.trace_id();
    let span_id = trace.span_id();
    let method = req.method().to_string();
    let path = req.path().to_string();
    let operation_name: &str = operation.as_ref();

    let span = info_span!(
        "counter_request",
        otel.name = operation_name,
        http.method = %method,
        http.route = "/",
        trace_id = %trace_id,
        span_id = %span_id,
        http.status_code = field::Empty,
        counter.value = field::Empty,
        otel.status_code = field::Empty,
        otel.status_message = field::Empty,
    );

    let client = client_identity(req, state.trusted_proxies());
    let result = execute(state, &client, operation)
        .instrument(span.clone())
        .await;

    let status = match &result {
        Ok(_) => 200,
        Err(err) => err.status_code().as_u16(),
    };
    RequestOutcome::new(method.as_str(), path.as_str(), status)
        .with_duration(started.elapsed())
        .with_counter(result.as_ref().ok().copied())
        .record();

    span.in_scope(|| {
        span.record("http.status_code", status);
        match &result {
            Ok(counter) => {
                span.record("counter.value", *counter);
                info!(
                    method = %method,
                    path = %path,
                    counter = *counter,
                    status,
                    trace_id = %trace_id,
                    span_id = %span_id,
                    "{}",
                    operation.log_message()
                );
            }
            Err(err) => log_failure(&span, err, &method, &path, status, &client),
        }
    });

    let counter = result?;
    Ok(HttpResponse::Ok().json(CounterResponse {
        counter,
        message: operation.success_message().to_string(),
    }))
}

async fn execute(
    state: &AppState,
    client: &str,
    operation: CounterOperation,
) -> Result<i64, ApiError> {
    if let RateLimitDecision::Denied { quota, retry_after } =
        state.limiter().allow(client, EndpointClass::Limited).await
    {
        return Err(ApiError::RateLimited { quota, retry_after });
    }

    let store = state
        .available_store()
        .ok_or_else(|| ApiError::Unavailable("Redis not connected".to_string()))?;

    let outcome = match operation {
        CounterOperation::GetCounter => store.get_counter().await,
        CounterOperation::IncrementCounter => store.increment_counter().await,
    };

    match outcome {
        Ok(value) => {
            state.connectivity().mark_connected();
            Ok(value)
        }
        Err(err) => {
            if err.is_connectivity() {
                state.connectivity().mark_disconnected();
            }
            Err(err.into())
        }
    }
}

fn log_failure(span: &Span, err: &ApiError, method: &str, path: &str, status: u16, client: &str) {
    if let ApiError::RateLimited { quota, .. } = err {
        info!(method, path, status, client, limit = %quota, "Rate limit exceeded");
        return;
    }

    let detail = err.detail();
    span.record("otel.status_code", "ERROR");
    span.record("otel.status_message", detail.as_str());
    match err {
        ApiError::Unavailable(_) => {
            error!(method, path, status, error = %detail, "Redis connection error")
        }
        _ => error!(method, path, status, error = %detail, "Internal server error"),
    }
}
