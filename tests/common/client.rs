//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides methods for all server endpoints.
//! When routes or request formats change, update only this file.

use super::constants::*;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;

/// How the client presents credentials
#[derive(Clone, Debug)]
enum Credentials {
    None,
    ApiKey(String),
    Bearer(String),
}

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    credentials: Credentials,
}

impl TestClient {
    /// Creates a client that sends no credentials
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            credentials: Credentials::None,
        }
    }

    /// Creates a client sending `X-API-Key`
    pub fn with_api_key(base_url: String, key: &str) -> Self {
        Self {
            credentials: Credentials::ApiKey(key.to_string()),
            ..Self::new(base_url)
        }
    }

    /// Creates a client sending `Authorization: Bearer`
    pub fn with_bearer(base_url: String, token: &str) -> Self {
        Self {
            credentials: Credentials::Bearer(token.to_string()),
            ..Self::new(base_url)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::None => request,
            Credentials::ApiKey(key) => request.header("X-API-Key", key),
            Credentials::Bearer(token) => request.bearer_auth(token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ========================================================================
    // Public Endpoints
    // ========================================================================

    pub async fn health(&self) -> Response {
        self.client
            .get(self.url("/health"))
            .send()
            .await
            .expect("Health request failed")
    }

    pub async fn openapi(&self) -> Response {
        self.client
            .get(self.url("/openapi.yaml"))
            .send()
            .await
            .expect("OpenAPI request failed")
    }

    pub async fn metrics(&self) -> Response {
        self.client
            .get(self.url("/metrics"))
            .send()
            .await
            .expect("Metrics request failed")
    }

    // ========================================================================
    // MCP Endpoints
    // ========================================================================

    /// POSTs a raw body to `/mcp`
    pub async fn post_mcp_raw(&self, body: &str) -> Response {
        self.authorize(self.client.post(self.url("/mcp")))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("MCP request failed")
    }

    /// POSTs a JSON message (or batch array) to `/mcp`
    pub async fn post_mcp(&self, message: &Value) -> Response {
        self.authorize(self.client.post(self.url("/mcp")))
            .json(message)
            .send()
            .await
            .expect("MCP request failed")
    }

    /// Sends one JSON-RPC request to `/mcp`
    pub async fn rpc(&self, id: i64, method: &str, params: Option<Value>) -> Response {
        self.post_mcp(&request(id, method, params)).await
    }

    /// Calls a tool and returns the JSON-RPC response body
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let response = self
            .rpc(
                1,
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response.json().await.expect("Invalid JSON response")
    }

    pub async fn post_batch(&self, requests: Vec<Value>) -> Response {
        self.authorize(self.client.post(self.url("/mcp/batch")))
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .expect("Batch request failed")
    }

    pub async fn post_stream(&self, message: &Value) -> Response {
        self.authorize(self.client.post(self.url("/mcp/stream")))
            .json(message)
            .send()
            .await
            .expect("Stream request failed")
    }

    pub async fn get_stream(&self) -> Response {
        self.authorize(self.client.get(self.url("/mcp/stream")))
            .send()
            .await
            .expect("Stream request failed")
    }
}

/// Builds a JSON-RPC request
pub fn request(id: i64, method: &str, params: Option<Value>) -> Value {
    let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}
