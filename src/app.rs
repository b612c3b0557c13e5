use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::AppConfig;
use crate::routes::{key_routes, system_routes};
use crate::services::rate_limit::limit_requests;
use crate::services::sweeper::Sweeper;
use crate::state::app::AppState;

/// Build the complete Axum application:
/// - /key          (create / read / update / delete)
/// - /healthcheck  (liveness)
/// - /version
///
/// Requests over the per-client limit get a 429. Every other request first
/// offers the sweeper a chance to run (debounced).
pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .merge(key_routes::routes(state.clone()))
        .merge(system_routes::routes(state.config.clone()))

        // Lazy eviction trigger
        .layer(middleware::from_fn_with_state(
            state.sweeper.clone(),
            trigger_sweep,
        ))
        .layer(middleware::from_fn_with_state(
            state.limits.clone(),
            limit_requests,
        ))
        .layer(CompressionLayer::new());

    if let Some(cors) = cors_layer(&state.config) {
        app = app.layer(cors);
    }

    // Logging middleware
    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

async fn trigger_sweep(
    State(sweeper): State<Arc<Sweeper>>,
    request: Request,
    next: Next,
) -> Response {
    // Runs on its own task and unit of work; the request does not wait.
    let _ = sweeper.maybe_trigger();
    next.run(request).await
}

fn cors_layer(cfg: &AppConfig) -> Option<CorsLayer> {
    let raw = cfg.cors_origins.as_deref()?;

    let origins: Vec<HeaderValue> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::PUT,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}
