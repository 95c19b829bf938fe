//! Session pool: one pseudo-terminal child per agent id, an output
//! batching pipeline per session, bounded scrollback, and the subscriber
//! fan-out that feeds both the desktop sink and remote WebSocket clients.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::collab::DesktopSink;
use crate::error::PoolError;
use crate::event::{EventBus, PoolEvent};
use crate::pty::{self, PtyBridge, ResizeSender, RunState};
use crate::ring::RingBuffer;

/// Maximum size a pending batch may reach before an immediate flush.
pub const BATCH_MAX: usize = 64 * 1024;
/// Coalescing window for output that hasn't hit `BATCH_MAX`.
pub const BATCH_INTERVAL: Duration = Duration::from_millis(8);
/// Exit-report tail buffer capacity, independent of the scrollback ring.
pub const TAIL_CAP: usize = 8 * 1024;
/// Number of trailing non-empty lines kept in the exit report.
pub const MAX_LINES: usize = 50;
/// Default scrollback ring buffer capacity.
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;
/// A chunk under this size is assumed to be an interactive prompt fragment
/// and flushes immediately rather than waiting out the coalescing window.
/// Kept as a runtime-configured value (see [`SessionPool::with_config`])
/// rather than a constant so it stays tunable and testable.
pub const DEFAULT_INTERACTIVE_THRESHOLD: usize = 1024;

/// Opaque agent identifier, caller-supplied and unique within the
/// process's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque task identifier. Many agents may share one task id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current run state of one agent's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Exited { exit_code: Option<i32>, signal: Option<i32> },
}

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    callback: Arc<dyn Fn(&str) + Send + Sync>,
}

/// Snapshot of a session's non-streaming attributes.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub created_at: u64,
    pub cols: u16,
    pub rows: u16,
}

/// One PTY child process plus its batching/subscriber/scrollback state.
/// `subscribers`, `scrollback`, and `status` are touched from multiple
/// tasks and are lock-guarded; the batch and tail buffers are owned
/// exclusively by this session's output pipeline task and never shared.
struct Session {
    agent_id: AgentId,
    task_id: TaskId,
    bridge: PtyBridge,
    resize_tx: ResizeSender,
    cols: AtomicU16,
    rows: AtomicU16,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    scrollback: Mutex<RingBuffer>,
    status: RwLock<AgentStatus>,
    created_at: u64,
}

fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Inputs to [`SessionPool::spawn`].
pub struct SpawnRequest {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env_overrides: HashMap<String, String>,
}

/// Process-wide registry of live sessions, keyed by agent id, plus the
/// lifecycle event bus shared by every session it hosts.
pub struct SessionPool {
    sessions: DashMap<AgentId, Arc<Session>>,
    events: EventBus,
    desktop_sink: Arc<dyn DesktopSink>,
    ring_capacity: usize,
    interactive_threshold: usize,
}

impl SessionPool {
    pub fn new(desktop_sink: Arc<dyn DesktopSink>) -> Arc<Self> {
        Self::with_config(desktop_sink, DEFAULT_RING_CAPACITY, DEFAULT_INTERACTIVE_THRESHOLD)
    }

    pub fn with_config(desktop_sink: Arc<dyn DesktopSink>, ring_capacity: usize, interactive_threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            events: EventBus::new(),
            desktop_sink,
            ring_capacity,
            interactive_threshold,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Trigger an out-of-band `list-changed` event, e.g. after the caller
    /// makes an external change to task metadata that should be reflected
    /// in the next `agents` projection.
    pub fn notify_list_changed(&self) {
        self.events.emit(PoolEvent::ListChanged);
    }

    /// Validate and spawn a new agent, insert it into the pool, and start
    /// its output pipeline task. Emits `spawn` on success.
    pub fn spawn(self: &Arc<Self>, req: SpawnRequest) -> Result<(), PoolError> {
        pty::validate_command(&req.command).map_err(PoolError::InvalidCommand)?;

        let (bridge, output_rx, resize_tx, state_rx) =
            pty::spawn_pty(&req.command, &req.args, &req.cwd, req.cols, req.rows, &req.env_overrides)
                .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;

        let session = Arc::new(Session {
            agent_id: req.agent_id.clone(),
            task_id: req.task_id,
            bridge,
            resize_tx,
            cols: AtomicU16::new(req.cols),
            rows: AtomicU16::new(req.rows),
            next_subscriber_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            scrollback: Mutex::new(RingBuffer::new(self.ring_capacity)),
            status: RwLock::new(AgentStatus::Running),
            created_at: unix_now_secs(),
        });

        self.sessions.insert(req.agent_id.clone(), Arc::clone(&session));
        tracing::info!(agent_id = %req.agent_id, task_id = %session.task_id, cols = req.cols, rows = req.rows, "agent spawned");
        self.events.emit(PoolEvent::Spawn { agent_id: req.agent_id });

        let pool = Arc::clone(self);
        tokio::spawn(run_session_pipeline(pool, session, output_rx, state_rx));
        Ok(())
    }

    pub fn write(&self, agent_id: &AgentId, data: &[u8]) -> Result<(), PoolError> {
        let session = self.get(agent_id)?;
        session.bridge.write(data).map_err(|e| PoolError::Io(e.to_string()))
    }

    pub fn resize(&self, agent_id: &AgentId, cols: u16, rows: u16) -> Result<(), PoolError> {
        let session = self.get(agent_id)?;
        session.cols.store(cols, Ordering::Relaxed);
        session.rows.store(rows, Ordering::Relaxed);
        session
            .resize_tx
            .send((cols, rows))
            .map_err(|_| PoolError::Io("resize channel closed".to_string()))
    }

    /// Clear subscribers so the final exit flush does not notify stale
    /// listeners, then signal the child. Final pool cleanup still runs in
    /// the pipeline's exit handler. No-op if the agent is unknown.
    pub fn kill(&self, agent_id: &AgentId) {
        if let Some(session) = self.sessions.get(agent_id) {
            session.subscribers.lock().unwrap().clear();
            tracing::info!(agent_id = %agent_id, "agent killed");
            let _ = session.bridge.kill();
        }
    }

    pub fn kill_all(&self) {
        let ids: Vec<AgentId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.kill(&id);
        }
    }

    /// Returns `None` if the agent no longer exists.
    pub fn subscribe(&self, agent_id: &AgentId, callback: impl Fn(&str) + Send + Sync + 'static) -> Option<SubscriberId> {
        let session = self.sessions.get(agent_id)?;
        let id = session.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        session.subscribers.lock().unwrap().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        Some(id)
    }

    /// Silent if the agent or the subscriber id is absent.
    pub fn unsubscribe(&self, agent_id: &AgentId, id: SubscriberId) {
        if let Some(session) = self.sessions.get(agent_id) {
            session.subscribers.lock().unwrap().retain(|s| s.id != id);
        }
    }

    pub fn scrollback(&self, agent_id: &AgentId) -> Option<String> {
        let session = self.sessions.get(agent_id)?;
        Some(session.scrollback.lock().unwrap().to_base64())
    }

    pub fn active_ids(&self) -> Vec<AgentId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn meta(&self, agent_id: &AgentId) -> Option<SessionMeta> {
        let session = self.sessions.get(agent_id)?;
        Some(SessionMeta {
            agent_id: session.agent_id.clone(),
            task_id: session.task_id.clone(),
            created_at: session.created_at,
            cols: session.cols.load(Ordering::Relaxed),
            rows: session.rows.load(Ordering::Relaxed),
        })
    }

    pub fn cols(&self, agent_id: &AgentId) -> Option<u16> {
        self.sessions.get(agent_id).map(|s| s.cols.load(Ordering::Relaxed))
    }

    pub fn status(&self, agent_id: &AgentId) -> Option<AgentStatus> {
        self.sessions.get(agent_id).map(|s| *s.status.read().unwrap())
    }

    pub fn task_id(&self, agent_id: &AgentId) -> Option<TaskId> {
        self.sessions.get(agent_id).map(|s| s.task_id.clone())
    }

    fn get(&self, agent_id: &AgentId) -> Result<Arc<Session>, PoolError> {
        self.sessions
            .get(agent_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.clone()))
    }
}

/// Append `data` to `tail`, truncating from the front so it never exceeds
/// `TAIL_CAP`.
fn push_tail(tail: &mut Vec<u8>, data: &[u8]) {
    tail.extend_from_slice(data);
    if tail.len() > TAIL_CAP {
        let excess = tail.len() - TAIL_CAP;
        tail.drain(..excess);
    }
}

/// Decode `tail` as UTF-8 (lossily), split on `\n`, strip trailing `\r`,
/// drop empty lines, and keep only the last `MAX_LINES`.
fn decode_tail_lines(tail: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(tail);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() > MAX_LINES {
        let drop = lines.len() - MAX_LINES;
        lines.drain(..drop);
    }
    lines
}

/// Atomically take and clear `batch`, then deliver it to the desktop sink,
/// the scrollback ring, and every currently registered subscriber, in that
/// order. No-op if `batch` is empty.
fn flush(pool: &SessionPool, session: &Session, batch: &mut Vec<u8>) {
    if batch.is_empty() {
        return;
    }
    let data = std::mem::take(batch);
    let encoded = BASE64_STANDARD.encode(&data);

    pool.desktop_sink.send_output(&session.agent_id, &encoded);
    session.scrollback.lock().unwrap().write(&data);

    let subscribers = session.subscribers.lock().unwrap();
    for sub in subscribers.iter() {
        (sub.callback)(&encoded);
    }
}

fn handle_exit(pool: &SessionPool, session: &Session, exit_code: i32, tail: &[u8]) {
    let last_output = decode_tail_lines(tail);

    *session.status.write().unwrap() = AgentStatus::Exited {
        exit_code: Some(exit_code),
        signal: None,
    };
    tracing::info!(agent_id = %session.agent_id, task_id = %session.task_id, exit_code, "agent exited");

    pool.desktop_sink
        .send_exit(&session.agent_id, Some(exit_code), None, &last_output);
    pool.events.emit(PoolEvent::Exit {
        agent_id: session.agent_id.clone(),
        exit_code: Some(exit_code),
        signal: None,
    });
    pool.sessions.remove(&session.agent_id);
}

/// The per-session output pipeline: owns the pending batch and exit tail,
/// coalesces child output per the batching rules in [`flush`], and runs
/// the exit sequence exactly once when the child terminates.
async fn run_session_pipeline(
    pool: Arc<SessionPool>,
    session: Arc<Session>,
    mut output_rx: mpsc::Receiver<Vec<u8>>,
    mut state_rx: mpsc::Receiver<RunState>,
) {
    let mut batch: Vec<u8> = Vec::new();
    let mut tail: Vec<u8> = Vec::new();
    let mut flush_deadline: Option<Instant> = None;
    let mut output_closed = false;

    loop {
        let sleep = async {
            match flush_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            maybe_chunk = output_rx.recv(), if !output_closed => {
                match maybe_chunk {
                    Some(chunk) => {
                        push_tail(&mut tail, &chunk);
                        let chunk_len = chunk.len();
                        batch.extend_from_slice(&chunk);

                        if batch.len() >= BATCH_MAX {
                            flush(&pool, &session, &mut batch);
                            flush_deadline = None;
                        } else if chunk_len < pool.interactive_threshold {
                            flush(&pool, &session, &mut batch);
                            flush_deadline = None;
                        } else if flush_deadline.is_none() {
                            flush_deadline = Some(Instant::now() + BATCH_INTERVAL);
                        }
                    }
                    None => output_closed = true,
                }
            }

            _ = sleep, if flush_deadline.is_some() => {
                flush(&pool, &session, &mut batch);
                flush_deadline = None;
            }

            maybe_state = state_rx.recv() => {
                match maybe_state {
                    Some(RunState::Running) => {}
                    Some(RunState::Exited { exit_code }) => {
                        flush(&pool, &session, &mut batch);
                        handle_exit(&pool, &session, exit_code, &tail);
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NullDesktopSink;
    use std::sync::atomic::AtomicUsize;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s.to_string())
    }

    fn task(s: &str) -> TaskId {
        TaskId::new(s.to_string())
    }

    #[test]
    fn decode_tail_lines_strips_cr_and_empties() {
        let tail = b"one\r\ntwo\n\nthree\r\n";
        assert_eq!(decode_tail_lines(tail), vec!["one", "two", "three"]);
    }

    #[test]
    fn decode_tail_lines_keeps_only_last_max_lines() {
        let mut buf = Vec::new();
        for i in 0..(MAX_LINES + 10) {
            buf.extend_from_slice(format!("line{}\n", i).as_bytes());
        }
        let lines = decode_tail_lines(&buf);
        assert_eq!(lines.len(), MAX_LINES);
        assert_eq!(lines[0], "line10");
        assert_eq!(lines[MAX_LINES - 1], format!("line{}", MAX_LINES + 9));
    }

    #[test]
    fn push_tail_truncates_from_front() {
        let mut tail = vec![0u8; TAIL_CAP];
        push_tail(&mut tail, b"extra");
        assert_eq!(tail.len(), TAIL_CAP);
        assert_eq!(&tail[tail.len() - 5..], b"extra");
    }

    #[test]
    fn unknown_agent_operations_report_not_found() {
        let pool = SessionPool::new(Arc::new(NullDesktopSink));
        let id = agent("missing");
        assert!(matches!(pool.write(&id, b"x"), Err(PoolError::AgentNotFound(_))));
        assert!(matches!(pool.resize(&id, 80, 24), Err(PoolError::AgentNotFound(_))));
        assert!(pool.scrollback(&id).is_none());
        assert!(pool.meta(&id).is_none());
        assert!(pool.subscribe(&id, |_| {}).is_none());
    }

    #[test]
    fn kill_unknown_agent_is_noop() {
        let pool = SessionPool::new(Arc::new(NullDesktopSink));
        pool.kill(&agent("ghost"));
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_command() {
        let pool = SessionPool::new(Arc::new(NullDesktopSink));
        let req = SpawnRequest {
            agent_id: agent("a1"),
            task_id: task("t1"),
            command: "echo hi; rm -rf /".to_string(),
            args: vec![],
            cwd: PathBuf::new(),
            cols: 80,
            rows: 24,
            env_overrides: HashMap::new(),
        };
        let err = pool.spawn(req).unwrap_err();
        assert!(matches!(err, PoolError::InvalidCommand(_)));
        assert!(pool.active_ids().is_empty());
    }

    #[tokio::test]
    async fn spawn_echo_flushes_output_to_subscriber_and_exits() {
        let pool = SessionPool::new(Arc::new(NullDesktopSink));
        let id = agent("a1");
        let req = SpawnRequest {
            agent_id: id.clone(),
            task_id: task("t1"),
            command: "/bin/echo".to_string(),
            args: vec!["hello".to_string()],
            cwd: PathBuf::new(),
            cols: 80,
            rows: 24,
            env_overrides: HashMap::new(),
        };
        pool.spawn(req).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = Arc::clone(&received);
        pool.subscribe(&id, move |chunk| {
            received2.lock().unwrap().push(chunk.to_string());
        });

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if pool.status(&id).is_none() {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("session did not exit in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let chunks = received.lock().unwrap();
        let mut decoded = Vec::new();
        for c in chunks.iter() {
            decoded.extend(BASE64_STANDARD.decode(c).unwrap());
        }
        let text = String::from_utf8_lossy(&decoded);
        assert!(text.contains("hello"));
    }

    #[tokio::test]
    async fn event_bus_sees_spawn_and_exit() {
        let pool = SessionPool::new(Arc::new(NullDesktopSink));
        let spawns = Arc::new(AtomicUsize::new(0));
        let exits = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&spawns);
        let e = Arc::clone(&exits);
        pool.events().on(move |ev| match ev {
            PoolEvent::Spawn { .. } => {
                s.fetch_add(1, Ordering::SeqCst);
            }
            PoolEvent::Exit { .. } => {
                e.fetch_add(1, Ordering::SeqCst);
            }
            PoolEvent::ListChanged => {}
        });

        let id = agent("a2");
        let req = SpawnRequest {
            agent_id: id.clone(),
            task_id: task("t1"),
            command: "/bin/echo".to_string(),
            args: vec!["hi".to_string()],
            cwd: PathBuf::new(),
            cols: 80,
            rows: 24,
            env_overrides: HashMap::new(),
        };
        pool.spawn(req).unwrap();
        assert_eq!(spawns.load(Ordering::SeqCst), 1);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while exits.load(Ordering::SeqCst) == 0 {
            if std::time::Instant::now() > deadline {
                panic!("exit event not observed in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
