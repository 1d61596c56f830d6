use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use shared::Result;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStatus, EntityFamily, TenantId};
use crate::monitoring::{uptime_seconds, CacheClearResponse, CacheHealthResponse};
use crate::state::AppState;

/// Operations surface of the cache: health, metrics and administrative clears.
pub fn monitoring_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/cache", get(cache_health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/admin/cache/:tenant_id", delete(clear_tenant_cache))
}

/// Liveness for load balancers
async fn health_check() -> impl IntoResponse {
    let health = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": env!("CARGO_PKG_NAME")
    });

    (StatusCode::OK, Json(health))
}

/// 200 when the distributed tier is healthy or disabled; 503 when it is
/// enabled but failing.
async fn cache_health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start_time = std::time::Instant::now();
    let cache = state.cache.health_check().await;

    let status_code = match cache.status {
        CacheStatus::Healthy | CacheStatus::Disabled => StatusCode::OK,
        CacheStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    info!(
        status = ?cache.status,
        check_duration_ms = %start_time.elapsed().as_millis(),
        "Cache health check completed"
    );

    let response = CacheHealthResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime_seconds(),
        cache,
        stats: state.cache.stats(),
        warm_entries: state.cache.warm_entries(),
    };

    (status_code, Json(response))
}

async fn prometheus_metrics() -> impl IntoResponse {
    crate::observability::metrics_handler().await
}

#[derive(Debug, Deserialize)]
struct ClearParams {
    entity_type: Option<String>,
}

async fn clear_tenant_cache(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<ClearParams>,
) -> Result<Json<CacheClearResponse>> {
    let tenant = TenantId::new(tenant_id)?;
    let family = params
        .entity_type
        .as_deref()
        .map(str::parse::<EntityFamily>)
        .transpose()?;

    let deleted = state.cache.invalidate_tenant_cache(&tenant, family).await;

    Ok(Json(CacheClearResponse {
        tenant_id: tenant.to_string(),
        entity_type: family.map(|f| f.namespace().to_string()),
        deleted,
    }))
}
