//! HTTP ingest surface: envelope/store/security handlers behind the DSN
//! Auth/Throttle Gate (spec §4.1, §4.2, §6).

pub mod auth;
pub mod compression;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod state;

use axum::{middleware::from_fn, routing::post, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Builds the ingest router: three POST routes behind the Auth/Throttle Gate,
/// request-id/metrics/compression/tracing/CORS layered the same way the
/// teacher's `api_router` wires its middleware stack.
pub fn ingest_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/{project_id}/store/",
            post(handlers::store_handler),
        )
        .route(
            "/api/{project_id}/envelope/",
            post(handlers::envelope_handler),
        )
        .route(
            "/api/{project_id}/security/",
            post(handlers::security_handler),
        )
        .layer(auth::AuthThrottleLayer::new(state.clone()))
        .layer(from_fn(faultline_telemetry::middleware::metrics_middleware))
        .layer(from_fn(faultline_telemetry::tracing_setup::request_id_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
