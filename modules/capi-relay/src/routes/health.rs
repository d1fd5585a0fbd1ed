use axum::Json;
use serde_json::Value;

/// Liveness probe
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "capi-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
