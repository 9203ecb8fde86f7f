//! Router construction.

use axum::Router;
use axum::routing::{get, head, post};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::state::AppState;
use crate::web::middleware::cors::cors_layer;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{status, uploads};

/// Creates the upload gateway router.
pub fn create_router(state: AppState) -> Router {
    let prefix = route_prefix(&state.config.base_path);

    let router = Router::new()
        .route(&prefix, post(uploads::post_file))
        .route(
            &format!("{prefix}/{{id}}"),
            head(uploads::head_file)
                .patch(uploads::patch_file)
                .get(uploads::get_file)
                .delete(uploads::delete_file),
        )
        .route(
            &format!("{prefix}/{{id}}/{{filename}}"),
            get(uploads::get_file_named),
        )
        .route("/api/health", get(status::health))
        .with_state(state.clone());

    router.layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        cors_layer(&state.config.cors_origins),
        TimeoutLayer::new(Duration::from_secs(60)),
    ))
}

/// Route prefix derived from the configured base path, which may be either a
/// plain path or a full URL.
pub fn route_prefix(base_path: &str) -> String {
    let path = match url::Url::parse(base_path) {
        Ok(parsed) => parsed.path().to_owned(),
        // Relative base paths don't parse as URLs; they already are the path.
        Err(_) => base_path.to_owned(),
    };

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/files".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::route_prefix;

    #[test]
    fn plain_path_is_normalized() {
        assert_eq!(route_prefix("/files/"), "/files");
        assert_eq!(route_prefix("/files"), "/files");
        assert_eq!(route_prefix("files"), "/files");
    }

    #[test]
    fn full_url_keeps_only_the_path() {
        assert_eq!(route_prefix("https://example.com/uploads/"), "/uploads");
    }

    #[test]
    fn bare_host_url_falls_back() {
        assert_eq!(route_prefix("https://example.com/"), "/files");
        assert_eq!(route_prefix("/"), "/files");
    }
}
