//! Read-only REST projection: `GET /api/agents` and `GET /api/agents/{id}`,
//! plus the catch-all `404` for any other `/api/*` path (spec.md §4.4).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use ptyhub_core::protocol::AgentStatusKind;
use ptyhub_core::session::AgentId;

use crate::app::AppState;

pub async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let list = ptyhub_core::build_projection(&state.pool, state.metadata.as_ref());
    Json(list)
}

#[derive(Debug, Serialize)]
struct AgentDetail {
    #[serde(rename = "agentId")]
    agent_id: String,
    scrollback: String,
    status: AgentStatusKind,
    #[serde(rename = "exitCode")]
    exit_code: Option<i32>,
}

pub async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let agent_id = AgentId::new(id.clone());
    let scrollback = state.pool.scrollback(&agent_id);
    let status = state.pool.status(&agent_id);

    match (scrollback, status) {
        (Some(scrollback), Some(status)) => {
            let (status, exit_code) = match status {
                ptyhub_core::session::AgentStatus::Running => (AgentStatusKind::Running, None),
                ptyhub_core::session::AgentStatus::Exited { exit_code, .. } => (AgentStatusKind::Exited, exit_code),
            };
            Json(AgentDetail {
                agent_id: id,
                scrollback,
                status,
                exit_code,
            })
            .into_response()
        }
        _ => (StatusCode::NOT_FOUND, Json(json!({"error": "agent not found"}))).into_response(),
    }
}

/// Catch-all for any other `/api/*` path.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}
