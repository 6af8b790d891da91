//! Wire-protocol handlers for both sides of the object-store/cache
//! interface a mount talks to: spec.md §6's store protocol
//! (`GET /store/<namespace>/<hash>`, `POST /<namespace>`) and its HTTP
//! cache-layer variant (`GET /<dedupe>/files/<hash>`,
//! `GET /<dedupe>/md/<id>.flist`, `HEAD` existence probes on both).
//!
//! Storage on disk mirrors the URL shape directly: objects live at
//! `<data_dir>/store/<namespace>/<hash>`, cache blobs at
//! `<data_dir>/<dedupe>/files/<hash>`, cache manifests at
//! `<data_dir>/<dedupe>/md/<id>.flist`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub data_dir: Arc<std::path::PathBuf>,
}

fn object_hash_hex(body: &[u8]) -> String {
    use openssl::hash::{hash, MessageDigest};
    let digest = hash(MessageDigest::md5(), body).expect("md5 is always available");
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// `GET /store/<namespace>/<hash>` — spec.md §6: 200 with the stored body,
/// 404 on miss.
pub async fn store_get(
    State(state): State<AppState>,
    Path((namespace, hash)): Path<(String, String)>,
) -> Response {
    let path = state.data_dir.join("store").join(&namespace).join(&hash);
    match tokio::fs::read(&path).await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/brotli")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `HEAD /store/<namespace>/<hash>` — existence probe.
pub async fn store_head(
    State(state): State<AppState>,
    Path((namespace, hash)): Path<(String, String)>,
) -> StatusCode {
    let path = state.data_dir.join("store").join(&namespace).join(&hash);
    if tokio::fs::metadata(&path).await.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// `POST /<namespace>` — spec.md §6: the store is content-addressed by
/// the hash of the bytes it receives, so the response carries no body;
/// the uploader already knows the same hash locally (it's the MD5 of the
/// exact bytes it's posting) and uses it to address subsequent `GET`s.
pub async fn store_post(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Response {
    let hash = object_hash_hex(&body);
    let dir = state.data_dir.join("store").join(&namespace);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(error = %e, "failed to create namespace directory");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match tokio::fs::write(dir.join(&hash), &body).await {
        Ok(()) => (StatusCode::CREATED, hash).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to write object");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /<dedupe>/files/<hash>` — cache-layer blob fetch.
pub async fn cache_get_file(
    State(state): State<AppState>,
    Path((dedupe, hash)): Path<(String, String)>,
) -> Response {
    let path = state.data_dir.join(&dedupe).join("files").join(&hash);
    match tokio::fs::read(&path).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `HEAD /<dedupe>/files/<hash>` — cache existence probe.
pub async fn cache_head_file(
    State(state): State<AppState>,
    Path((dedupe, hash)): Path<(String, String)>,
) -> StatusCode {
    let path = state.data_dir.join(&dedupe).join("files").join(&hash);
    if tokio::fs::metadata(&path).await.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// `GET /<dedupe>/md/<id>.flist` — cache-layer manifest fetch.
pub async fn cache_get_meta(
    State(state): State<AppState>,
    Path((dedupe, filename)): Path<(String, String)>,
) -> Response {
    let path = state.data_dir.join(&dedupe).join("md").join(&filename);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn health() -> &'static str {
    "OK"
}
