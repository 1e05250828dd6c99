//! Test server lifecycle management
//!
//! Each test gets an isolated server on a random port, backed by an
//! in-memory BigQuery fixture.

use super::constants::*;
use bigquery_mcp_server::bigquery::{InMemoryBackend, SchemaField, TableKind};
use bigquery_mcp_server::config::AuthSettings;
use bigquery_mcp_server::mcp::{McpDispatcher, RateLimitConfig};
use bigquery_mcp_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Builds the fixture dataset: one table and one view in `sales`.
pub fn fixture_backend() -> InMemoryBackend {
    InMemoryBackend::new(TEST_PROJECT)
        .with_table(
            TEST_DATASET,
            TEST_TABLE,
            TableKind::Table,
            vec![
                SchemaField::new("order_id", "INTEGER"),
                SchemaField::new("customer", "STRING"),
                SchemaField::new("amount", "FLOAT"),
            ],
        )
        .with_table(
            TEST_DATASET,
            TEST_VIEW,
            TableKind::View,
            vec![
                SchemaField::new("day", "DATE"),
                SchemaField::new("total", "FLOAT"),
            ],
        )
        .with_query_rows(vec![
            json!({ "order_id": 1, "customer": "acme", "amount": 12.5 }),
            json!({ "order_id": 2, "customer": "globex", "amount": 99.0 }),
        ])
}

/// Test server instance
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// The backend, for inspecting executed queries
    pub backend: Arc<InMemoryBackend>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server with authentication disabled
    pub async fn spawn() -> Self {
        Self::spawn_with(AuthSettings::default(), RateLimitConfig::default()).await
    }

    /// Spawns a server accepting [`TEST_API_KEY`] and JWTs signed with
    /// [`TEST_JWT_SECRET`]
    pub async fn spawn_with_auth() -> Self {
        let auth = AuthSettings {
            enabled: true,
            api_keys: vec![TEST_API_KEY.to_string()],
            jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        };
        Self::spawn_with(auth, RateLimitConfig::default()).await
    }

    /// Spawns a server with custom auth and rate limits
    ///
    /// # Panics
    ///
    /// Panics if binding fails or the server doesn't become ready in time.
    pub async fn spawn_with(auth: AuthSettings, rate_limits: RateLimitConfig) -> Self {
        let backend = Arc::new(fixture_backend());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            host: "127.0.0.1".to_string(),
            port,
            openapi_path: None,
        };
        let dispatcher = McpDispatcher::new(backend.clone(), rate_limits);
        let app = make_app(config, dispatcher, auth);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            backend,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Base URL with the `ws` scheme
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
