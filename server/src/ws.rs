//! WebSocket upgrade and per-client relay loop: auth/capacity gating on
//! upgrade, an `agents` frame on connect, lifecycle-event broadcast, and
//! the `input`/`resize`/`kill`/`subscribe`/`unsubscribe` dispatch table
//! (spec.md §4.4).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};

use ptyhub_core::event::PoolEvent;
use ptyhub_core::protocol::{self, AgentStatusKind, ClientFrame, ServerFrame};
use ptyhub_core::session::{AgentId, SubscriberId};

use crate::app::AppState;
use crate::auth::is_authenticated;

/// Debounce between an `exit` event's immediate `status` frame and the
/// refreshed `agents` list that follows it. spec.md §4.4/§9 names the
/// value but not a justification for it.
const EXIT_RELIST_DEBOUNCE: Duration = Duration::from_millis(100);

/// Maximum payload size accepted on an upgraded WebSocket connection.
const MAX_WS_PAYLOAD_BYTES: usize = 64 * 1024;

fn send_frame(tx: &tokio::sync::mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

/// Pre-upgrade gate: enforce the client cap before auth, per spec.md §4.4
/// ("enforce a maximum of 10 concurrent clients... enforce authentication").
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    if state.client_count.load(Ordering::SeqCst) >= state.max_clients {
        tracing::warn!(?remote_addr, max_clients = state.max_clients, "rejected websocket connection over client cap");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections").into_response();
    }

    if !is_authenticated(&state, &headers, &uri) {
        tracing::warn!(?remote_addr, "rejected unauthenticated websocket connection");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    state.client_count.fetch_add(1, Ordering::SeqCst);
    ws.max_message_size(MAX_WS_PAYLOAD_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

/// Per-client subscription bookkeeping: at most one subscriber handle per
/// agent id, per spec.md §3.
type SubscriptionMap = Arc<Mutex<HashMap<AgentId, SubscriberId>>>;

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote_addr: Option<SocketAddr>) {
    tracing::info!(?remote_addr, client_count = state.client_count.load(Ordering::SeqCst), "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

    let agents = ptyhub_core::build_projection(&state.pool, state.metadata.as_ref());
    send_frame(&out_tx, &ServerFrame::Agents { list: agents });

    let listener_id = register_lifecycle_listener(&state, out_tx.clone(), Arc::clone(&subscriptions));

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let Some(frame) = protocol::parse_client_frame(&text) else { continue };
        dispatch(&state, &subscriptions, &out_tx, frame);
    }

    state.pool.events().off(listener_id);
    for (agent_id, id) in subscriptions.lock().unwrap().drain() {
        state.pool.unsubscribe(&agent_id, id);
    }
    send_task.abort();
    let remaining = state.client_count.fetch_sub(1, Ordering::SeqCst) - 1;
    tracing::info!(?remote_addr, client_count = remaining, "client disconnected");
}

/// Registers this client's listener against the shared lifecycle event bus.
/// `spawn`/`list-changed` rebroadcast the full projection; `exit` sends an
/// immediate `status` frame, drops this client's own subscription
/// bookkeeping for the now-gone agent (the session itself is already gone
/// from the pool, so a later `unsubscribe` for it would be a no-op anyway —
/// this just keeps the per-client map from accumulating stale entries),
/// then (after the debounce) rebroadcasts a refreshed projection, per
/// spec.md §4.4's ordering guarantee.
fn register_lifecycle_listener(
    state: &Arc<AppState>,
    out_tx: tokio::sync::mpsc::UnboundedSender<Message>,
    subscriptions: SubscriptionMap,
) -> ptyhub_core::ListenerId {
    let pool = Arc::clone(&state.pool);
    let metadata = Arc::clone(&state.metadata);
    state.pool.events().on(move |event| match event {
        PoolEvent::Spawn { .. } | PoolEvent::ListChanged => {
            let list = ptyhub_core::build_projection(&pool, metadata.as_ref());
            send_frame(&out_tx, &ServerFrame::Agents { list });
        }
        PoolEvent::Exit { agent_id, exit_code, .. } => {
            send_frame(
                &out_tx,
                &ServerFrame::Status {
                    agent_id: agent_id.clone(),
                    status: AgentStatusKind::Exited,
                    exit_code: *exit_code,
                },
            );
            subscriptions.lock().unwrap().remove(agent_id);

            let pool = Arc::clone(&pool);
            let metadata = Arc::clone(&metadata);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(EXIT_RELIST_DEBOUNCE).await;
                let list = ptyhub_core::build_projection(&pool, metadata.as_ref());
                send_frame(&out_tx, &ServerFrame::Agents { list });
            });
        }
    })
}

fn dispatch(
    state: &Arc<AppState>,
    subscriptions: &SubscriptionMap,
    out_tx: &tokio::sync::mpsc::UnboundedSender<Message>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Input { agent_id, data } => {
            let _ = state.pool.write(&agent_id, data.as_bytes());
        }
        ClientFrame::Resize { agent_id, cols, rows } => {
            let _ = state.pool.resize(&agent_id, cols, rows);
        }
        ClientFrame::Kill { agent_id } => {
            state.pool.kill(&agent_id);
        }
        ClientFrame::Subscribe { agent_id } => {
            if subscriptions.lock().unwrap().contains_key(&agent_id) {
                return;
            }
            if let Some(scrollback) = state.pool.scrollback(&agent_id) {
                if let Some(cols) = state.pool.cols(&agent_id) {
                    send_frame(
                        out_tx,
                        &ServerFrame::Scrollback {
                            agent_id: agent_id.clone(),
                            data: scrollback,
                            cols,
                        },
                    );
                }
            }
            let sub_tx = out_tx.clone();
            let sub_agent = agent_id.clone();
            let id = state.pool.subscribe(&agent_id, move |chunk| {
                send_frame(
                    &sub_tx,
                    &ServerFrame::Output {
                        agent_id: sub_agent.clone(),
                        data: chunk.to_string(),
                    },
                );
            });
            if let Some(id) = id {
                subscriptions.lock().unwrap().insert(agent_id, id);
            }
        }
        ClientFrame::Unsubscribe { agent_id } => {
            if let Some(id) = subscriptions.lock().unwrap().remove(&agent_id) {
                state.pool.unsubscribe(&agent_id, id);
            }
        }
    }
}
