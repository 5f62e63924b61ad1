pub mod counter;
pub mod fallback;
pub mod health;
pub mod metrics;

pub use counter::{get_counter_handler, increment_counter_handler};
pub use fallback::{method_not_allowed_handler, not_found_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;

use std::time::Duration;

use actix_web::{http::header, http::StatusCode, HttpResponse, ResponseError};
use counter_domain::rate_limit::Quota;
use counter_domain::storage::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Store missing, marked disconnected, or failed with a connectivity
    /// error. The detail is for logs only.
    #[error("Cannot connect to Redis")]
    Unavailable(String),
    #[error("Rate limit exceeded: {quota}")]
    RateLimited { quota: Quota, retry_after: Duration },
    #[error("{0}")]
    Internal(String),
    #[error("The endpoint {path} does not exist")]
    NotFound { path: String },
    #[error("Method {method} is not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl ApiError {
    /// Short label placed in the `error` field of the body.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Unavailable(_) => "Service temporarily unavailable",
            ApiError::RateLimited { .. } => "Too many requests",
            ApiError::Internal(_) => "Internal server error",
            ApiError::NotFound { .. } => "Not found",
            ApiError::MethodNotAllowed { .. } => "Method not allowed",
        }
    }

    /// Underlying cause for logs and span status.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Unavailable(detail) => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(detail) => ApiError::Unavailable(detail),
            StoreError::Unexpected(detail) => ApiError::Internal(detail),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let ApiError::RateLimited { retry_after, .. } = self {
            let seconds = retry_after_secs(*retry_after).to_string();
            builder.insert_header((header::RETRY_AFTER, seconds));
        }
        builder.json(ErrorBody {
            error: self.label().to_string(),
            message: self.to_string(),
        })
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(50)), 50);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn store_errors_map_to_status() {
        let unavailable = ApiError::from(StoreError::connectivity("refused"));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.to_string(), "Cannot connect to Redis");
        assert_eq!(unavailable.detail(), "refused");

        let internal = ApiError::from(StoreError::unexpected("WRONGTYPE"));
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.to_string(), "WRONGTYPE");
    }
}
