use actix_web::{http::StatusCode, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub redis: String,
    /// Present only when a ping was attempted and failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            redis: "connected".to_string(),
            error: None,
        }
    }

    fn unhealthy(error: Option<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            redis: "disconnected".to_string(),
            error,
        }
    }
}

/// Pings the store on every call and refreshes the connectivity flag.
pub async fn health_handler(state: web::Data<AppState>) -> HttpResponse {
    let span = info_span!("health_check");

    let Some(store) = state.store() else {
        state.connectivity().mark_disconnected();
        debug!("health check without a store client");
        return HttpResponse::build(StatusCode::SERVICE_UNAVAILABLE)
            .json(HealthResponse::unhealthy(None));
    };

    match store.ping().instrument(span).await {
        Ok(()) => {
            state.connectivity().mark_connected();
            HttpResponse::Ok().json(HealthResponse::healthy())
        }
        Err(err) => {
            state.connectivity().mark_disconnected();
            warn!(error = %err, "Health check failed");
            HttpResponse::build(StatusCode::SERVICE_UNAVAILABLE)
                .json(HealthResponse::unhealthy(Some(err.to_string())))
        }
    }
}
