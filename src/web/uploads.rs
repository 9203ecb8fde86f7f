//! Upload handlers: creation authorization plus engine passthroughs.
//!
//! `post_file` is the trust boundary. Client metadata is decoded, reserved
//! fields are rejected, the client's true origin is resolved against the
//! trusted proxy ranges, any bearer claim is verified, and only then is the
//! re-encoded, now-authoritative request handed to the engine.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::{debug, error, warn};

use crate::claims::{self, ClaimError, ClaimOutcome};
use crate::engine::EngineError;
use crate::meta::{self, Metadata};
use crate::state::AppState;
use crate::web::middleware::client_ip::{self, TrustError};

const TUS_RESUMABLE_HEADER: &str = "tus-resumable";
const TUS_VERSION: &str = "1.0.0";
const UPLOAD_OFFSET_HEADER: &str = "upload-offset";
const UPLOAD_LENGTH_HEADER: &str = "upload-length";
const PATCH_CONTENT_TYPE: &str = "application/offset+octet-stream";

fn with_tus_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(TUS_RESUMABLE_HEADER),
        HeaderValue::from_static(TUS_VERSION),
    );
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST {base_path}` -- authorize and create an upload.
pub(super) async fn post_file(State(state): State<AppState>, request: Request) -> Response {
    let headers = request.headers();

    let raw_metadata = header_str(headers, meta::UPLOAD_METADATA_HEADER).unwrap_or("");
    let mut metadata = match Metadata::decode(raw_metadata) {
        Ok(metadata) => metadata,
        Err(e) => return with_tus_version((StatusCode::BAD_REQUEST, e.to_string()).into_response()),
    };

    // The client must not assert its own provenance.
    if metadata.contains_key(meta::REMOTE_IP_KEY) {
        return with_tus_version(
            (
                StatusCode::BAD_REQUEST,
                format!(
                    "metadata field {:?} cannot be set by client",
                    meta::REMOTE_IP_KEY
                ),
            )
                .into_response(),
        );
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let forwarded = header_str(headers, client_ip::FORWARDED_FOR_HEADER);
    let remote_ip = match client_ip::resolve(&peer, forwarded, &state.config.trusted_proxy_ranges) {
        Ok(ip) => ip,
        Err(e @ TrustError::AddressParse { .. }) => {
            // Server-side defect; details stay in the logs.
            error!(error = %e, "failed to determine the direct peer address");
            return with_tus_version(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
        Err(e @ TrustError::InvalidForwardedAddress { .. }) => {
            return with_tus_version((StatusCode::NOT_ACCEPTABLE, e.to_string()).into_response());
        }
    };

    // Identity fields are asserted by verification only, never by the client.
    for key in [meta::ACCOUNT_KEY, meta::ISSUER_KEY] {
        if metadata.contains_key(key) {
            return with_tus_version(
                (
                    StatusCode::BAD_REQUEST,
                    format!("metadata field {key:?} cannot be set by client"),
                )
                    .into_response(),
            );
        }
    }

    let token = metadata.get_str(meta::TOKEN_KEY).unwrap_or("").to_owned();
    match claims::verify(&token, &state.config.jwt_secrets_by_issuer) {
        Ok(ClaimOutcome::Skipped) => {}
        Ok(ClaimOutcome::Verified { issuer, account }) => {
            // Identity is asserted only when the token names an account; a
            // bare issuer claim verifies but augments nothing.
            if let Some(account) = account {
                debug!(issuer = %issuer, account = %account, "verified upload identity");
                metadata.insert_str(meta::ISSUER_KEY, &issuer);
                metadata.insert_str(meta::ACCOUNT_KEY, &account);
            }
        }
        Ok(ClaimOutcome::UnknownIssuer { issuer }) => {
            warn!(issuer = %issuer, "bearer token from unconfigured issuer, proceeding unauthenticated");
        }
        Err(e @ ClaimError::SignatureInvalid { .. }) => {
            return with_tus_version(
                (
                    StatusCode::UNAUTHORIZED,
                    format!("failed to process bearer token: {e}. Configured secret may be incorrect."),
                )
                    .into_response(),
            );
        }
        Err(e) => {
            return with_tus_version(
                (
                    StatusCode::BAD_REQUEST,
                    format!("failed to process bearer token: {e}"),
                )
                    .into_response(),
            );
        }
    }

    metadata.insert_str(meta::REMOTE_IP_KEY, &remote_ip.to_string());

    let Some(length) = header_str(headers, UPLOAD_LENGTH_HEADER).and_then(|v| v.parse::<u64>().ok())
    else {
        return with_tus_version(
            (
                StatusCode::BAD_REQUEST,
                "missing or invalid Upload-Length header",
            )
                .into_response(),
        );
    };

    // The re-encoded header is now the authoritative metadata.
    let metadata_header = metadata.encode();
    match state.engine.create(length, &metadata_header).await {
        Ok(created) => {
            let location = format!(
                "{}/{}",
                state.config.base_path.trim_end_matches('/'),
                created.id
            );
            let mut response = StatusCode::CREATED.into_response();
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers_mut().insert(header::LOCATION, value);
            }
            with_tus_version(response)
        }
        Err(EngineError::TooLarge { length, max }) => with_tus_version(
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("upload length {length} exceeds maximum {max}"),
            )
                .into_response(),
        ),
        Err(e) => {
            error!(error = ?e, "failed to create upload");
            with_tus_version(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// `HEAD {base_path}/{id}` -- current offset and declared length.
pub(super) async fn head_file(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(info) = state.engine.info(&id) else {
        return with_tus_version(StatusCode::NOT_FOUND.into_response());
    };

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(UPLOAD_OFFSET_HEADER),
        HeaderValue::from(info.offset),
    );
    headers.insert(
        HeaderName::from_static(UPLOAD_LENGTH_HEADER),
        HeaderValue::from(info.length),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    with_tus_version(response)
}

/// `PATCH {base_path}/{id}` -- append a chunk at the declared offset.
pub(super) async fn patch_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if header_str(&headers, header::CONTENT_TYPE.as_str()) != Some(PATCH_CONTENT_TYPE) {
        return with_tus_version(StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response());
    }

    let Some(offset) = header_str(&headers, UPLOAD_OFFSET_HEADER).and_then(|v| v.parse::<u64>().ok())
    else {
        return with_tus_version(
            (
                StatusCode::BAD_REQUEST,
                "missing or invalid Upload-Offset header",
            )
                .into_response(),
        );
    };

    match state.engine.append(&id, offset, &body) {
        Ok(new_offset) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            response.headers_mut().insert(
                HeaderName::from_static(UPLOAD_OFFSET_HEADER),
                HeaderValue::from(new_offset),
            );
            with_tus_version(response)
        }
        Err(EngineError::NotFound(_)) => with_tus_version(StatusCode::NOT_FOUND.into_response()),
        Err(e @ EngineError::OffsetMismatch { .. }) => {
            with_tus_version((StatusCode::CONFLICT, e.to_string()).into_response())
        }
        Err(e @ EngineError::LengthExceeded { .. }) => {
            with_tus_version((StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response())
        }
        Err(e) => {
            error!(error = ?e, id = %id, "failed to append chunk");
            with_tus_version(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// `GET {base_path}/{id}` -- read back the bytes received so far.
pub(super) async fn get_file(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.read(&id) {
        Some(data) => {
            let mut response = (StatusCode::OK, data).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            response
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET {base_path}/{id}/{filename}` -- filename-suffixed variant of
/// `get_file`; the trailing segment is cosmetic and ignored.
pub(super) async fn get_file_named(
    state: State<AppState>,
    Path((id, _filename)): Path<(String, String)>,
) -> Response {
    get_file(state, Path(id)).await
}

/// `DELETE {base_path}/{id}` -- terminate an in-flight upload.
pub(super) async fn delete_file(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.terminate(&id) {
        Ok(()) => with_tus_version(StatusCode::NO_CONTENT.into_response()),
        Err(EngineError::NotFound(_)) => with_tus_version(StatusCode::NOT_FOUND.into_response()),
        Err(e) => {
            error!(error = ?e, id = %id, "failed to terminate upload");
            with_tus_version(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
