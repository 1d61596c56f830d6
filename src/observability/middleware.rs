// ============================================================================
// HTTP METRICS MIDDLEWARE
// ============================================================================

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::record_http_request;

/// Records request count and latency for every route of the operations surface
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let normalized_path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    record_http_request(&method, &normalized_path, response.status().as_u16(), duration);

    response
}

/// Collapses tenant ids so per-tenant admin calls share one label value
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut normalized = Vec::with_capacity(segments.len());

    for (i, seg) in segments.iter().enumerate() {
        let after_cache_admin = i >= 2 && segments[i - 2] == "admin" && segments[i - 1] == "cache";
        if after_cache_admin && !seg.is_empty() {
            normalized.push(":tenant_id".to_string());
        } else if seg.parse::<i64>().is_ok() {
            normalized.push(":id".to_string());
        } else {
            normalized.push(seg.to_string());
        }
    }

    normalized.join("/")
}
