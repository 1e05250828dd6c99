//! End-to-end tests for the WebSocket transport
//!
//! A WebSocket is a stateful MCP session: it must be initialized before
//! tools and resources are available.

mod common;

use common::{request, TestServer, TEST_API_KEY};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: String) -> WsStream {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

async fn send(ws: &mut WsStream, message: Value) {
    ws.send(Message::Text(message.to_string().into()))
        .await
        .expect("Failed to send WebSocket message");
}

/// Waits for the next text frame, timing out after two seconds
async fn next_json(ws: &mut WsStream) -> Option<Value> {
    let result = timeout(Duration::from_secs(2), async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                return serde_json::from_str::<Value>(&text).ok();
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}

async fn initialize(ws: &mut WsStream) {
    send(
        ws,
        request(
            1,
            "initialize",
            Some(json!({ "clientInfo": { "name": "ws-e2e", "version": "1.0" } })),
        ),
    )
    .await;
    let response = next_json(ws).await.expect("No initialize response");
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn test_tools_require_initialize() {
    let server = TestServer::spawn().await;
    let mut ws = connect(server.ws_url("/mcp/ws")).await;

    send(&mut ws, request(1, "tools/list", None)).await;
    let response = next_json(&mut ws).await.unwrap();

    assert_eq!(response["id"], 1);
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(response["error"]["message"], "Not initialized");
}

#[tokio::test]
async fn test_session_after_initialize() {
    let server = TestServer::spawn().await;
    let mut ws = connect(server.ws_url("/mcp/ws")).await;

    initialize(&mut ws).await;

    send(&mut ws, request(2, "tools/list", None)).await;
    let response = next_json(&mut ws).await.unwrap();
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"]["tools"][0]["name"], "query");

    send(
        &mut ws,
        request(
            3,
            "tools/call",
            Some(json!({ "name": "query", "arguments": { "sql": "SELECT * FROM sales.orders" } })),
        ),
    )
    .await;
    let response = next_json(&mut ws).await.unwrap();
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_notification_gets_no_reply() {
    let server = TestServer::spawn().await;
    let mut ws = connect(server.ws_url("/mcp/ws")).await;

    initialize(&mut ws).await;

    send(
        &mut ws,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    send(&mut ws, request(9, "ping", None)).await;

    // The first frame back answers the ping
    let response = next_json(&mut ws).await.unwrap();
    assert_eq!(response["id"], 9);
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn test_batch_over_websocket() {
    let server = TestServer::spawn().await;
    let mut ws = connect(server.ws_url("/mcp/ws")).await;

    send(
        &mut ws,
        json!([
            request(1, "initialize", Some(json!({}))),
            request(2, "resources/list", None),
        ]),
    )
    .await;

    let response = next_json(&mut ws).await.unwrap();
    let responses = response.as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["result"]["resources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let server = TestServer::spawn().await;
    let mut ws = connect(server.ws_url("/mcp/ws")).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let response = next_json(&mut ws).await.unwrap();
    assert_eq!(response["error"]["code"], -32700);

    send(&mut ws, request(2, "ping", None)).await;
    let response = next_json(&mut ws).await.unwrap();
    assert_eq!(response["id"], 2);
}

#[tokio::test]
async fn test_websocket_without_credentials_is_rejected() {
    let server = TestServer::spawn_with_auth().await;

    let result = connect_async(server.ws_url("/mcp/ws")).await;
    assert!(
        result.is_err(),
        "WebSocket connection without credentials should be rejected"
    );
}

#[tokio::test]
async fn test_websocket_with_access_token_query() {
    let server = TestServer::spawn_with_auth().await;
    let url = server.ws_url(&format!("/mcp/ws?access_token={}", TEST_API_KEY));
    let mut ws = connect(url).await;

    initialize(&mut ws).await;
}
