//! Static SPA serving: path normalization, traversal rejection, MIME/cache
//! headers, and the `index.html` SPA-routing fallback (spec.md §4.4).
//!
//! Hand-rolled rather than `tower_http::ServeDir` directly: the exact
//! 400-on-traversal behavior and the per-extension cache-header table
//! spec.md demands don't fall out of `ServeDir` alone, though the overall
//! "serve a file, stream it, set headers" shape is grounded on the
//! teacher's `spa_fallback`/`ServeDir` combination in `web_server.rs`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::app::AppState;

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn cache_control_for(mime: &str) -> &'static str {
    if mime.starts_with("text/html") {
        "no-cache"
    } else {
        "public, max-age=31536000, immutable"
    }
}

/// `None` if `raw` resolves outside the static root: an absolute path, or
/// one whose components include a `..` that would climb above it.
fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let raw = if raw == "/" { "index.html" } else { raw.trim_start_matches('/') };
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return None;
    }
    if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    Some(candidate.to_path_buf())
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": "bad request"}))).into_response()
}

async fn stream_file(path: &Path) -> Option<Response> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mime = mime_for(path);
    let cache = cache_control_for(mime);
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    Some(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime)
            .header(header::CACHE_CONTROL, cache)
            .body(body)
            .unwrap(),
    )
}

/// Serves `state.static_dir` as a single-page app: `/` and any unknown path
/// both resolve to `index.html` once traversal/absolute-path checks pass.
pub async fn serve_static(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let Some(rel) = safe_relative_path(uri.path()) else {
        return bad_request();
    };

    let candidate = state.static_dir.join(&rel);
    if candidate.is_file() {
        if let Some(resp) = stream_file(&candidate).await {
            return resp;
        }
    }

    let index = state.static_dir.join("index.html");
    match stream_file(&index).await {
        Some(resp) => resp,
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response(),
    }
}
