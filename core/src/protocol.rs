//! Wire protocol between the server and browser clients.
//!
//! The codec is pure and allocation-only: parsing a client frame never
//! touches the pool, and any frame failing a type/presence/bound/integer
//! check is discarded rather than surfaced as a client-visible error, per
//! spec.md §4.3.

use serde::{Deserialize, Serialize};

use crate::session::AgentId;

pub const MAX_AGENT_ID_BYTES: usize = 100;
pub const MAX_INPUT_DATA_BYTES: usize = 4096;
pub const MIN_DIMENSION: i64 = 1;
pub const MAX_DIMENSION: i64 = 500;

/// Frames sent from the server to a browser client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Output {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        data: String,
    },
    Scrollback {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        data: String,
        cols: u16,
    },
    Status {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        status: AgentStatusKind,
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    Agents {
        list: Vec<crate::projection::RemoteAgent>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatusKind {
    Running,
    Exited,
}

/// Frames received from a browser client, already validated.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Input { agent_id: AgentId, data: String },
    Resize { agent_id: AgentId, cols: u16, rows: u16 },
    Kill { agent_id: AgentId },
    Subscribe { agent_id: AgentId },
    Unsubscribe { agent_id: AgentId },
}

/// Raw shape used only to (de)serialize a `ClientFrame` for round-trip
/// tests; production parsing goes through [`parse_client_frame`], which
/// applies the bound checks serde alone cannot express.
#[derive(Debug, Serialize, Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    ty: String,
    #[serde(rename = "agentId", default)]
    agent_id: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    cols: Option<serde_json::Value>,
    #[serde(default)]
    rows: Option<serde_json::Value>,
}

fn valid_agent_id(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_AGENT_ID_BYTES
}

fn as_bounded_int(v: &serde_json::Value) -> Option<i64> {
    let n = v.as_i64()?;
    // Reject anything that round-trips through a float (non-integer values
    // such as 1.5 deserialize into serde_json::Number without an i64 repr,
    // so as_i64() already excludes them; this guard also excludes floats
    // that happen to be integral, e.g. 12.0, which are not "integers").
    if v.is_f64() {
        return None;
    }
    Some(n)
}

/// Parse and validate a client-to-server frame from raw JSON text. Returns
/// `None` on any type, presence, bound, or integer-ness violation.
pub fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    let raw: RawClientFrame = serde_json::from_str(text).ok()?;
    let agent_id = raw.agent_id.filter(|s| valid_agent_id(s)).map(AgentId::new)?;

    match raw.ty.as_str() {
        "input" => {
            let data = raw.data?;
            if data.len() > MAX_INPUT_DATA_BYTES {
                return None;
            }
            Some(ClientFrame::Input { agent_id, data })
        }
        "resize" => {
            let cols = as_bounded_int(raw.cols.as_ref()?)?;
            let rows = as_bounded_int(raw.rows.as_ref()?)?;
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&cols)
                || !(MIN_DIMENSION..=MAX_DIMENSION).contains(&rows)
            {
                return None;
            }
            Some(ClientFrame::Resize {
                agent_id,
                cols: cols as u16,
                rows: rows as u16,
            })
        }
        "kill" => Some(ClientFrame::Kill { agent_id }),
        "subscribe" => Some(ClientFrame::Subscribe { agent_id }),
        "unsubscribe" => Some(ClientFrame::Unsubscribe { agent_id }),
        _ => None,
    }
}

/// Serialize a client frame back to JSON. Used by round-trip tests; the
/// server never re-serializes a frame it received.
pub fn serialize_client_frame(frame: &ClientFrame) -> serde_json::Value {
    match frame {
        ClientFrame::Input { agent_id, data } => serde_json::json!({
            "type": "input", "agentId": agent_id.as_str(), "data": data,
        }),
        ClientFrame::Resize { agent_id, cols, rows } => serde_json::json!({
            "type": "resize", "agentId": agent_id.as_str(), "cols": cols, "rows": rows,
        }),
        ClientFrame::Kill { agent_id } => serde_json::json!({
            "type": "kill", "agentId": agent_id.as_str(),
        }),
        ClientFrame::Subscribe { agent_id } => serde_json::json!({
            "type": "subscribe", "agentId": agent_id.as_str(),
        }),
        ClientFrame::Unsubscribe { agent_id } => serde_json::json!({
            "type": "unsubscribe", "agentId": agent_id.as_str(),
        }),
    }
}
