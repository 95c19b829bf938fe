//! ptyhub-server: axum HTTP + WebSocket front end for `ptyhub-core`'s
//! session pool. Binds one listener, authenticates every request, serves
//! the SPA, exposes the read-only `/api/agents` projection, and relays
//! live PTY output over `/ws` (spec.md §4.4).

pub mod api;
pub mod app;
pub mod auth;
pub mod cli;
pub mod discovery;
pub mod metadata;
pub mod static_files;
pub mod ws;

pub use app::{build_router, AppState};
pub use cli::Args;
