//! Axum HTTP gateway exposing the assistant under `/api`.
//!
//! Body size and overall request time are bounded by `[gateway]` config;
//! multipart uploads share the same body limit.

mod handlers;
mod server;

pub use server::{build_app, run_gateway, run_gateway_with_listener, serve_with_state};

use crate::assistant::Assistant;

/// Maximum sessions returned by the listing endpoint.
pub const SESSION_LIST_LIMIT: usize = 100;
/// Maximum messages returned for one session.
pub const MESSAGE_LIST_LIMIT: usize = 1000;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub assistant: Assistant,
}
