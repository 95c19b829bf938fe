//! End-to-end router tests built on `axum_test::TestServer`, grounded on the
//! `TestServer::new(app)` / `resp.assert_status(...)` style used against
//! `build_router` in the retrieval pack's other axum-based crate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use ptyhub_core::collab::{AgentMetadataProvider, DesktopSink};
use ptyhub_core::session::{AgentId, SessionPool, SpawnRequest, TaskId};

use ptyhub_server::app::{build_router, AppState};
use ptyhub_server::metadata::{LastLineSink, PoolMetadata};

const TOKEN: &str = "test-token-0123456789";

fn test_state(max_clients: usize) -> (Arc<AppState>, Arc<SessionPool>) {
    let sink = Arc::new(LastLineSink::new());
    let pool = SessionPool::with_config(Arc::clone(&sink) as Arc<dyn DesktopSink>, 64 * 1024, 1024);
    let metadata: Arc<dyn AgentMetadataProvider> = PoolMetadata::new(Arc::clone(&pool), sink);
    let state = Arc::new(AppState::new(
        Arc::clone(&pool),
        metadata,
        TOKEN.to_string(),
        PathBuf::from("./nonexistent-static-dir"),
        max_clients,
    ));
    (state, pool)
}

fn spawn_echo(pool: &Arc<SessionPool>, agent_id: &str, task_id: &str, words: &[&str]) {
    pool.spawn(SpawnRequest {
        agent_id: AgentId::new(agent_id.to_string()),
        task_id: TaskId::new(task_id.to_string()),
        command: "/bin/echo".to_string(),
        args: words.iter().map(|s| s.to_string()).collect(),
        cwd: PathBuf::new(),
        cols: 80,
        rows: 24,
        env_overrides: HashMap::new(),
    })
    .unwrap();
}

async fn wait_for_exit(pool: &Arc<SessionPool>, agent_id: &AgentId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.status(agent_id).is_some() {
        if tokio::time::Instant::now() > deadline {
            panic!("agent did not exit in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn unauthenticated_request_is_rejected() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/api/agents").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_list_agents_is_empty_initially() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/api/agents").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn agent_detail_reflects_spawned_session() {
    let (state, pool) = test_state(10);
    let id = AgentId::new("a1".to_string());
    spawn_echo(&pool, "a1", "t1", &["hello"]);
    wait_for_exit(&pool, &id).await;

    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    // The pool drops a session's entry once it exits, so its detail 404s.
    let resp = server.get("/api/agents/a1").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn projection_dedups_two_running_agents_sharing_a_task() {
    let (state, pool) = test_state(10);
    for agent_id in ["agent-a", "agent-b"] {
        pool.spawn(SpawnRequest {
            agent_id: AgentId::new(agent_id.to_string()),
            task_id: TaskId::new("shared-task".to_string()),
            command: "/bin/cat".to_string(),
            args: vec![],
            cwd: PathBuf::new(),
            cols: 80,
            rows: 24,
            env_overrides: HashMap::new(),
        })
        .unwrap();
    }

    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();
    let resp = server.get("/api/agents").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1, "expected one row per task id, got {body}");

    pool.kill_all();
}

#[tokio::test]
async fn projection_dedups_running_agent_over_already_exited_sibling() {
    let (state, pool) = test_state(10);
    let running = AgentId::new("running-agent".to_string());

    spawn_echo(&pool, "exited-agent", "shared-task", &["bye"]);
    wait_for_exit(&pool, &AgentId::new("exited-agent".to_string())).await;

    pool.spawn(SpawnRequest {
        agent_id: running.clone(),
        task_id: TaskId::new("shared-task".to_string()),
        command: "/bin/cat".to_string(),
        args: vec![],
        cwd: PathBuf::new(),
        cols: 80,
        rows: 24,
        env_overrides: HashMap::new(),
    })
    .unwrap();

    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();
    let resp = server.get("/api/agents").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let rows = body.as_array().unwrap();

    // The pool has already dropped "exited-agent"'s session entirely, so the
    // projection only ever sees the running sibling in the first place;
    // dedup-by-task-id is trivially satisfied with a single live candidate.
    assert_eq!(rows.len(), 1, "expected one row per task id, got {body}");
    assert_eq!(rows[0]["status"], "running");
    assert_eq!(rows[0]["agentId"], "running-agent");

    pool.kill_all();
}

#[tokio::test]
async fn exited_agent_disappears_from_agents_list() {
    let (state, pool) = test_state(10);
    let id = AgentId::new("short-lived".to_string());
    spawn_echo(&pool, "short-lived", "t1", &["hello"]);
    wait_for_exit(&pool, &id).await;

    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();
    let resp = server.get("/api/agents").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let rows = body.as_array().unwrap();

    // Once the pool has dropped the exited session, the list must not carry
    // a stale "exited" row for it forever; the agent simply disappears.
    assert!(rows.is_empty(), "exited agent should be gone from the list, got {body}");
}

#[tokio::test]
async fn unknown_agent_detail_is_404() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/api/agents/does-not-exist").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_api_path_is_json_404() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/api/nope").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json();
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn static_fallback_serves_index_for_unknown_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>shell</html>").unwrap();

    let sink = Arc::new(LastLineSink::new());
    let pool = SessionPool::with_config(Arc::clone(&sink) as Arc<dyn DesktopSink>, 64 * 1024, 1024);
    let metadata: Arc<dyn AgentMetadataProvider> = PoolMetadata::new(Arc::clone(&pool), sink);
    let state = Arc::new(AppState::new(pool, metadata, TOKEN.to_string(), dir.path().to_path_buf(), 10));

    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/some/client/route").add_query_param("token", TOKEN).await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("shell"));
}

#[tokio::test]
async fn security_headers_present_on_every_response() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let resp = server.get("/api/agents").add_query_param("token", TOKEN).await;
    resp.assert_header("x-content-type-options", "nosniff");
    resp.assert_header("x-frame-options", "DENY");
}

/// Minimal handshake headers so `WebSocketUpgrade`'s extractor accepts the
/// request and hands control to `ws_upgrade`'s own capacity/auth checks,
/// rather than axum rejecting it upstream for missing upgrade headers.
fn with_ws_handshake_headers(req: axum_test::TestRequest) -> axum_test::TestRequest {
    req.add_header("connection", "upgrade")
        .add_header("upgrade", "websocket")
        .add_header("sec-websocket-version", "13")
        .add_header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
}

#[tokio::test]
async fn websocket_connection_over_client_cap_is_rejected() {
    let (state, _pool) = test_state(0);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let req = with_ws_handshake_headers(server.get("/ws").add_query_param("token", TOKEN));
    let resp = req.await;
    resp.assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn websocket_connection_without_token_is_rejected() {
    let (state, _pool) = test_state(10);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).unwrap();

    let req = with_ws_handshake_headers(server.get("/ws"));
    let resp = req.await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}
