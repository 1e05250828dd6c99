use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use super::mcp_routes::make_mcp_routes;
use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::bigquery::BigQueryBackend;
use crate::config::{AppConfig, AuthSettings};
use crate::mcp::McpDispatcher;

pub const HEALTH_SERVER_NAME: &str = "mcp-bigquery";

const OPENAPI_CONTENT_TYPE: &str = "application/x-yaml";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server: &'static str,
    version: &'static str,
    uptime: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        server: HEALTH_SERVER_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime: format_uptime(state.start_time.elapsed()),
    })
}

/// Minimal description of the HTTP surface, served when no OpenAPI file is
/// configured.
fn generated_openapi() -> String {
    format!(
        r#"openapi: 3.0.3
info:
  title: MCP BigQuery Server
  description: Model Context Protocol server exposing read-only access to Google BigQuery.
  version: {version}
paths:
  /health:
    get:
      summary: Health check
      responses:
        '200':
          description: Server is healthy
  /mcp:
    post:
      summary: Execute an MCP JSON-RPC request or batch
      responses:
        '200':
          description: JSON-RPC response
        '202':
          description: Notification accepted
  /mcp/batch:
    post:
      summary: Execute several MCP JSON-RPC requests
      responses:
        '200':
          description: JSON-RPC responses
  /mcp/stream:
    get:
      summary: Server-sent events stream
      responses:
        '200':
          description: Event stream
    post:
      summary: Execute an MCP request and stream the responses as server-sent events
      responses:
        '200':
          description: Event stream
  /mcp/ws:
    get:
      summary: MCP over WebSocket
      responses:
        '101':
          description: Switching protocols
"#,
        version = env!("CARGO_PKG_VERSION")
    )
}

async fn openapi_yaml(State(state): State<ServerState>) -> Response {
    let content = match &state.config.openapi_path {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read OpenAPI file {:?}: {}", path, e);
                generated_openapi()
            }
        },
        None => generated_openapi(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENAPI_CONTENT_TYPE)],
        content,
    )
        .into_response()
}

pub fn make_app(config: ServerConfig, dispatcher: McpDispatcher, auth: AuthSettings) -> Router {
    let state = ServerState::new(config, dispatcher, auth);

    let public_routes: Router = Router::new()
        .route("/health", get(health))
        .route("/openapi.yaml", get(openapi_yaml))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    let mut app: Router = public_routes.merge(make_mcp_routes(state.clone()));

    app = app
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(CorsLayer::permissive());

    app
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, stopping HTTP server");
}

pub async fn run_server(config: &AppConfig, backend: Arc<dyn BigQueryBackend>) -> Result<()> {
    let server_config = ServerConfig::from(config);
    let dispatcher = McpDispatcher::new(backend, config.rate_limits.clone());
    let app = make_app(server_config.clone(), dispatcher, config.auth.clone());

    let address = server_config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!(
        "Serving MCP over HTTP on http://{} (auth {})",
        address,
        if config.auth.enabled { "enabled" } else { "disabled" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
