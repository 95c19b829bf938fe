//! Shared application state and router assembly, grounded on the teacher's
//! `AppState`-via-`State`-extractor / `Router::new()...with_state()` shape
//! in `web_server.rs`, with the auth middleware layered the way `coop`'s
//! `transport::mod::build_router` layers `auth::auth_layer`.

use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::extract::{State, Uri};
use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use ptyhub_core::collab::AgentMetadataProvider;
use ptyhub_core::session::SessionPool;

use crate::{api, auth, static_files, ws};

/// Everything a request handler needs: the pool, the metadata provider used
/// to build `RemoteAgent` rows, the process-lifetime auth token, the static
/// SPA root, and the live WebSocket client count/cap.
pub struct AppState {
    pub pool: Arc<SessionPool>,
    pub metadata: Arc<dyn AgentMetadataProvider>,
    pub token: String,
    pub static_dir: PathBuf,
    pub max_clients: usize,
    pub client_count: AtomicUsize,
}

impl AppState {
    pub fn new(pool: Arc<SessionPool>, metadata: Arc<dyn AgentMetadataProvider>, token: String, static_dir: PathBuf, max_clients: usize) -> Self {
        Self {
            pool,
            metadata,
            token,
            static_dir,
            max_clients,
            client_count: AtomicUsize::new(0),
        }
    }
}

/// Security response headers applied to every HTTP response, per spec.md
/// §4.4/§6.
async fn security_headers(req: axum::extract::Request, next: middleware::Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    resp
}

/// Any request under `/api/*` that didn't match a known route is a `404`
/// JSON error; everything else falls through to static-file serving, which
/// itself falls back to `index.html` for SPA routing.
async fn fallback(state: State<Arc<AppState>>, uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        api::not_found().await
    } else {
        static_files::serve_static(state, uri).await.into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/agents", get(api::list_agents))
        .route("/api/agents/{id}", get(api::get_agent))
        .route("/ws", get(ws::ws_upgrade))
        .fallback(get(fallback))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::require_auth))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}
