//! Health endpoint.

use axum::response::Json;
use serde_json::{Value, json};
use tracing::trace;

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT_HASH"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
