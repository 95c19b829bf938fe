//! Error taxonomy shared by the session pool and, through conversion, the
//! HTTP/WebSocket layer. Spawn/write/resize errors are returned to the
//! immediate caller and never take down the pool.

use crate::session::AgentId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Spawn was refused because the command contained a disallowed
    /// metacharacter.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The PTY or child process itself could not be created.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// write/resize/kill targeted an agent id that the pool does not (or no
    /// longer) know about.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// A write or resize could not reach the child process.
    #[error("io error: {0}")]
    Io(String),
}
