//! ptyhub-core: PTY session pool, ring-buffer scrollback, lifecycle event
//! bus, and wire protocol codec. No HTTP, no UI — the server crate wires
//! this up to the network.

pub mod collab;
pub mod error;
pub mod event;
pub mod projection;
pub mod protocol;
pub mod pty;
pub mod ring;
pub mod session;

pub use error::PoolError;
pub use event::{EventBus, ListenerId, PoolEvent};
pub use projection::{build_projection, RemoteAgent};
pub use ring::RingBuffer;
pub use session::{AgentId, AgentStatus, SessionPool, SpawnRequest, TaskId};
