//! Lifecycle event bus: `spawn`, `exit`, and `list-changed` as one tagged
//! enum, delivered synchronously to listeners in registration order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::session::AgentId;

#[derive(Debug, Clone)]
pub enum PoolEvent {
    Spawn {
        agent_id: AgentId,
    },
    Exit {
        agent_id: AgentId,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    ListChanged,
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

/// Registry of lifecycle listeners. A listener that panics is isolated so
/// the remaining listeners still run.
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener, invoked synchronously on every future `emit`.
    /// Returns a handle usable with [`EventBus::off`].
    pub fn on(&self, listener: impl Fn(&PoolEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    /// Invoke every registered listener, in registration order, with the
    /// given event. A listener is cloned out from under the lock first so a
    /// listener that calls back into `on`/`off` cannot deadlock.
    pub fn emit(&self, event: PoolEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            let _ = catch_unwind(AssertUnwindSafe(|| listener(&event)));
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
