//! `docchat-server` exposes the docchat pipeline over HTTP: raw file uploads
//! in, chat answers out, plus a small HTML page to drive both.

pub mod protocol;
pub mod server;

pub use server::{AppState, ServerConfig, app_router, run_server};
