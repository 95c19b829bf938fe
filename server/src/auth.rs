//! Bearer/query-param token authentication, generalized from the
//! constant-time compare pattern in `coop`'s `transport::auth` module.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde_json::json;

use crate::app::AppState;

/// Generate a 24-byte random token, base64url-encoded without padding.
/// Rotated every time the server starts; never persisted.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison: every byte pair is inspected regardless
/// of earlier mismatches, so failure does not leak timing information about
/// how many leading bytes matched.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Pull a candidate token from `Authorization: Bearer <t>`, else from a
/// `token=<t>` query parameter. Returns `None` if neither is present.
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(t) = s.strip_prefix("Bearer ") {
                return Some(t.to_string());
            }
        }
    }
    let query = uri.query()?;
    for pair in query.split('&') {
        if let Some(t) = pair.strip_prefix("token=") {
            return Some(t.to_string());
        }
    }
    None
}

/// `true` iff the request carries a token matching `state.token`.
pub fn is_authenticated(state: &AppState, headers: &HeaderMap, uri: &Uri) -> bool {
    match extract_token(headers, uri) {
        Some(candidate) => constant_time_eq(&candidate, &state.token),
        None => false,
    }
}

fn unauthorized_response() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response()
}

/// Axum middleware enforcing authentication on every route it is layered
/// over. spec.md §4.4 draws no exemption list for plain HTTP requests, but
/// `/ws` is deliberately skipped here: its own handler enforces the
/// capacity check *before* authentication, an ordering this blanket
/// middleware can't express, so it owns its auth check instead.
pub async fn require_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if req.uri().path() == "/ws" {
        return next.run(req).await;
    }
    let headers = req.headers().clone();
    let uri = req.uri().clone();
    if !is_authenticated(&state, &headers, &uri) {
        tracing::warn!(path = %req.uri().path(), "rejected unauthenticated request");
        return unauthorized_response();
    }
    next.run(req).await
}
