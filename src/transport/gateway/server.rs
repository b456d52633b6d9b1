use super::AppState;
use super::handlers::{
    handle_analyze_image, handle_chat_message, handle_chat_stream, handle_create_session,
    handle_delete_session, handle_generate_image, handle_health, handle_list_messages,
    handle_list_sessions, handle_root, handle_status,
};

use crate::assistant::Assistant;
use crate::config::{Config, GatewayConfig};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Returns true when the bind address is not a loopback address.
fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

/// Bind `host:port` and serve until shutdown.
pub async fn run_gateway(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    // Refuse public bind without explicit opt-in.
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the gateway has no authentication.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse gateway bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind gateway socket")?;

    run_gateway_with_listener(host, listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let assistant = Assistant::from_config(&config)
        .await
        .context("initialize assistant")?;
    let actual_port = listener
        .local_addr()
        .context("get gateway listener local address")?
        .port();
    print_gateway_banner(&format!("{host}:{actual_port}"), assistant.pool().len());

    serve_with_state(listener, AppState { assistant }, &config.gateway).await
}

/// Serve prebuilt state on `listener`. Stops on Ctrl-C.
pub async fn serve_with_state(
    listener: tokio::net::TcpListener,
    state: AppState,
    gateway: &GatewayConfig,
) -> Result<()> {
    let app = build_app(state, gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP gateway")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn print_gateway_banner(display_addr: &str, key_count: usize) {
    println!("Gateway listening on {display_addr} ({key_count} provider keys)");
    println!("  GET    /api/");
    println!("  GET    /api/status");
    println!("  POST   /api/chat/sessions");
    println!("  GET    /api/chat/sessions");
    println!("  GET    /api/chat/sessions/{{id}}/messages");
    println!("  DELETE /api/chat/sessions/{{id}}");
    println!("  POST   /api/chat/message");
    println!("  POST   /api/chat/stream/{{id}}");
    println!("  POST   /api/image/generate");
    println!("  POST   /api/image/analyze");
    println!("  GET    /health");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

pub fn build_app(state: AppState, gateway: &GatewayConfig) -> Router {
    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api", get(handle_root))
        .route("/api/", get(handle_root))
        .route("/api/status", get(handle_status))
        .route(
            "/api/chat/sessions",
            post(handle_create_session).get(handle_list_sessions),
        )
        .route(
            "/api/chat/sessions/{session_id}",
            delete(handle_delete_session),
        )
        .route(
            "/api/chat/sessions/{session_id}/messages",
            get(handle_list_messages),
        )
        .route("/api/chat/message", post(handle_chat_message))
        .route("/api/chat/stream/{session_id}", post(handle_chat_stream))
        .route("/api/image/generate", post(handle_generate_image))
        .route("/api/image/analyze", post(handle_analyze_image));

    let mut app = app
        .with_state(state)
        .layer(DefaultBodyLimit::max(gateway.max_body_bytes))
        .layer(RequestBodyLimitLayer::new(gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(gateway.request_timeout_secs),
        ));

    if !gateway.cors_origins.is_empty() {
        app = app.layer(cors_layer(&gateway.cors_origins));
    }

    app
}
