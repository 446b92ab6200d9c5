//! # Server Module
//!
//! HTTP surface of the monitor: an unauthenticated liveness route, the
//! external cron trigger, and the status and manual-run routes. Everything
//! but `/health` sits behind the bearer-secret guard.

pub mod auth;
pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

/// Create router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route(
            "/api/cron/health-check",
            get(handlers::cron_health_check).post(handlers::cron_health_check),
        )
        .route("/api/monitor/status", get(handlers::monitor_status))
        .route("/api/monitor/run", post(handlers::force_run))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_secret));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(guarded)
        .layer(
            ServiceBuilder::new()
                // Tracing middleware - logs HTTP requests and responses
                .layer(TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO))),
        )
        .with_state(state)
}
