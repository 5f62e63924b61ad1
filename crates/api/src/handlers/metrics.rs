use actix_web::{web::Data, HttpResponse};
use tracing::debug;

use crate::state::AppState;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Always 200. A render failure serves the last good exposition instead.
pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    let body = state.telemetry().render_metrics().unwrap_or_else(|err| {
        debug!(error = %err, "serving fallback metrics exposition");
        state.telemetry().last_exposition()
    });
    HttpResponse::Ok()
        .content_type(EXPOSITION_CONTENT_TYPE)
        .body(body)
}
