//! Exact-match CORS origin allow-listing.
//!
//! Only origins present in the configured list are echoed back in
//! `Access-Control-Allow-Origin`; `*` is not supported. A request from a
//! non-listed origin gets no echo rather than an error -- the browser
//! enforces the restriction. The layer appends `Vary: Origin` so caches
//! never serve one origin's response to another.

use axum::http::{HeaderName, HeaderValue, Method, header};
use std::collections::HashSet;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: HashSet<String> = allowed_origins.iter().cloned().collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin
                    .to_str()
                    .map(|o| origins.contains(o))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([
            Method::POST,
            Method::HEAD,
            Method::PATCH,
            Method::GET,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("upload-metadata"),
            HeaderName::from_static("upload-length"),
            HeaderName::from_static("upload-offset"),
            HeaderName::from_static("tus-resumable"),
        ])
        .expose_headers([
            header::LOCATION,
            HeaderName::from_static("upload-offset"),
            HeaderName::from_static("upload-length"),
            HeaderName::from_static("tus-resumable"),
            HeaderName::from_static("x-request-id"),
        ])
}
