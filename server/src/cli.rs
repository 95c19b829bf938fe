//! Command-line surface for the `ptyhub-server` binary.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Default HTTP/WebSocket bind port, per spec.md §6.
pub const DEFAULT_PORT: u16 = 7777;

#[derive(Debug, Clone, Parser)]
#[command(name = "ptyhub-server", about = "Remote PTY multiplexer: HTTP + WebSocket agent access")]
pub struct Args {
    /// Port to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Directory the static SPA is served from.
    #[arg(long, default_value = "./web/dist")]
    pub static_dir: PathBuf,

    /// Maximum number of concurrent WebSocket clients.
    #[arg(long, default_value_t = 10)]
    pub max_clients: usize,

    /// Scrollback ring buffer capacity per agent, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub ring_capacity: usize,
}
