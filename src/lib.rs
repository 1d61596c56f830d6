use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod cache_ttl;
pub mod monitoring;
pub mod observability;
pub mod services;
pub mod state;
pub mod tasks;

use monitoring::endpoints::monitoring_router;
use observability::metrics_middleware;
use state::AppState;

use axum::middleware as axum_middleware;

pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // Health, Prometheus /metrics and admin cache clears
        .merge(monitoring_router())
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
