use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::config::AppConfig;

pub fn routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/version", get(version))
        .with_state(config)
}

/// GET /healthcheck
async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// GET /version
async fn version(State(config): State<Arc<AppConfig>>) -> Json<serde_json::Value> {
    Json(json!({
        "version": config.server_version
    }))
}
