//! Capability traits for the collaborators the pool and server consume but
//! do not own: the desktop-owned IPC sink and the task/agent metadata
//! lookups used to build the [`crate::projection::RemoteAgent`] list.
//!
//! Kept as small object-safe traits so tests can supply doubles instead of
//! a real desktop process or task store.

use crate::protocol::AgentStatusKind;
use crate::session::{AgentId, TaskId};

/// The primary, always-present consumer local to the owning process.
/// Delivery is best-effort: a failing sink must never stall a flush.
pub trait DesktopSink: Send + Sync {
    fn send_output(&self, agent_id: &AgentId, data_b64: &str);

    fn send_exit(&self, agent_id: &AgentId, exit_code: Option<i32>, signal: Option<i32>, last_output: &[String]);
}

/// A sink that drops everything. Useful when no desktop owner is attached
/// (headless server mode) or in tests that don't care about delivery.
pub struct NullDesktopSink;

impl DesktopSink for NullDesktopSink {
    fn send_output(&self, _agent_id: &AgentId, _data_b64: &str) {}

    fn send_exit(&self, _agent_id: &AgentId, _exit_code: Option<i32>, _signal: Option<i32>, _last_output: &[String]) {}
}

#[derive(Debug, Clone)]
pub struct AgentStatusInfo {
    pub status: AgentStatusKind,
    pub exit_code: Option<i32>,
    pub last_line: String,
}

/// Synchronous, non-blocking lookups the projection builder needs but the
/// pool does not itself track (task naming lives with the caller's own
/// task/project model).
pub trait AgentMetadataProvider: Send + Sync {
    fn task_name(&self, task_id: &TaskId) -> String;

    fn agent_status(&self, agent_id: &AgentId) -> Option<AgentStatusInfo>;
}
