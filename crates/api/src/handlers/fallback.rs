//! Catch-all responses for unknown paths and unsupported methods. Both are
//! counted like any other request but never rate limited.

use actix_web::{HttpRequest, HttpResponse, ResponseError};
use counter_domain::model::RequestOutcome;

use super::ApiError;

pub async fn not_found_handler(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(reject(
        &req,
        ApiError::NotFound {
            path: req.path().to_string(),
        },
    ))
}

pub async fn method_not_allowed_handler(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(reject(
        &req,
        ApiError::MethodNotAllowed {
            method: req.method().to_string(),
            path: req.path().to_string(),
        },
    ))
}

fn reject(req: &HttpRequest, err: ApiError) -> ApiError {
    RequestOutcome::new(
        req.method().as_str(),
        req.path(),
        err.status_code().as_u16(),
    )
    .record();
    err
}
