//! Concrete `DesktopSink`/`AgentMetadataProvider` the standalone server
//! binds to the pool with. spec.md §4.6 treats both as abstract
//! collaborators owned by whatever process embeds the pool; the in-process
//! desktop owner supplies richer implementations (task names, a real IPC
//! sink) — the standalone binary has neither, so it derives the projection
//! straight from the pool itself: live status and task id come from the
//! pool, `last_line` comes from this side table, and once the pool drops a
//! session on exit this table forgets it too, so the agent simply stops
//! appearing rather than lingering forever as a stale "exited" row.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use dashmap::DashMap;

use ptyhub_core::collab::{AgentMetadataProvider, AgentStatusInfo, DesktopSink};
use ptyhub_core::event::PoolEvent;
use ptyhub_core::protocol::AgentStatusKind;
use ptyhub_core::session::{AgentId, AgentStatus, SessionPool, TaskId};

/// Tracks the last non-empty output line per agent, fed by the flush
/// pipeline's `send_output` calls. Used to populate `RemoteAgent::last_line`
/// for a still-live agent, since the standalone binary has no external task
/// store to ask instead. Entries are dropped once the owning agent exits —
/// see `forget` — so this table never grows past the pool's own live set.
pub struct LastLineSink {
    last_line: DashMap<AgentId, String>,
}

impl LastLineSink {
    pub fn new() -> Self {
        Self { last_line: DashMap::new() }
    }

    /// Drops any remembered line for `agent_id`. Called once the pool has
    /// finished delivering an agent's exit, so a long-running server never
    /// accumulates entries for agents that no longer exist.
    fn forget(&self, agent_id: &AgentId) {
        self.last_line.remove(agent_id);
    }
}

impl Default for LastLineSink {
    fn default() -> Self {
        Self::new()
    }
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|l| !l.trim().is_empty())
}

impl DesktopSink for LastLineSink {
    fn send_output(&self, agent_id: &AgentId, data_b64: &str) {
        let Ok(bytes) = BASE64_STANDARD.decode(data_b64) else { return };
        let text = String::from_utf8_lossy(&bytes);
        if let Some(line) = last_non_empty_line(&text) {
            self.last_line.insert(agent_id.clone(), line.to_string());
        }
    }

    fn send_exit(&self, agent_id: &AgentId, _exit_code: Option<i32>, _signal: Option<i32>, last_output: &[String]) {
        if let Some(line) = last_output.last() {
            self.last_line.insert(agent_id.clone(), line.clone());
        }
    }
}

/// Builds `RemoteAgent` rows from the pool plus the `LastLineSink` side
/// table; task names default to the task id itself since the standalone
/// binary has no separate task/project store to consult. Status and exit
/// code always come straight from the pool — an agent the pool has dropped
/// after exit has no status here either, so `build_projection` simply stops
/// seeing it rather than surfacing a permanent "exited" row for it.
pub struct PoolMetadata {
    pool: Arc<SessionPool>,
    sink: Arc<LastLineSink>,
}

impl PoolMetadata {
    pub fn new(pool: Arc<SessionPool>, sink: Arc<LastLineSink>) -> Arc<Self> {
        let this = Arc::new(Self { pool: Arc::clone(&pool), sink });

        let listener = Arc::clone(&this);
        pool.events().on(move |event| {
            if let PoolEvent::Exit { agent_id, .. } = event {
                listener.sink.forget(agent_id);
            }
        });

        this
    }
}

impl AgentMetadataProvider for PoolMetadata {
    fn task_name(&self, task_id: &TaskId) -> String {
        task_id.as_str().to_string()
    }

    fn agent_status(&self, agent_id: &AgentId) -> Option<AgentStatusInfo> {
        let last_line = self.sink.last_line.get(agent_id).map(|e| e.clone()).unwrap_or_default();

        let status = self.pool.status(agent_id)?;
        let (status, exit_code) = match status {
            AgentStatus::Running => (AgentStatusKind::Running, None),
            AgentStatus::Exited { exit_code, .. } => (AgentStatusKind::Exited, exit_code),
        };
        Some(AgentStatusInfo { status, exit_code, last_line })
    }
}
