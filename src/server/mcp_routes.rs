//! HTTP transports for the MCP dispatcher: request/response, batch, SSE and
//! WebSocket. Each route only frames messages; all protocol handling happens
//! in [`McpDispatcher`](crate::mcp::McpDispatcher).

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::metrics;
use super::state::{GuardedDispatcher, ServerState};
use crate::mcp::{McpError, McpResponse, Principal, SessionState};

const SSE_KEEP_ALIVE_SECS: u64 = 15;

#[derive(Deserialize, Debug)]
struct BatchRequestBody {
    requests: Vec<Value>,
}

fn into_events(response: Option<Value>) -> Vec<Event> {
    let responses = match response {
        Some(Value::Array(responses)) => responses,
        Some(single) => vec![single],
        None => Vec::new(),
    };

    let mut events: Vec<Event> = responses
        .into_iter()
        .map(|r| Event::default().event("message").data(r.to_string()))
        .collect();
    events.push(Event::default().event("done").data("{}"));
    events
}

async fn post_mcp(
    principal: Principal,
    State(dispatcher): State<GuardedDispatcher>,
    body: String,
) -> Response {
    let mut session = SessionState::stateless(principal);
    match dispatcher.handle_text(&mut session, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn post_mcp_batch(
    principal: Principal,
    State(dispatcher): State<GuardedDispatcher>,
    Json(body): Json<BatchRequestBody>,
) -> Response {
    if body.requests.is_empty() {
        let error = McpResponse::error(
            None,
            McpError::InvalidRequest("Batch must contain at least one request".to_string()),
        );
        return (StatusCode::BAD_REQUEST, Json(error.to_value())).into_response();
    }

    let mut session = SessionState::stateless(principal);
    let responses = dispatcher.handle_batch(&mut session, body.requests).await;
    Json(Value::Array(responses)).into_response()
}

async fn post_mcp_stream(
    principal: Principal,
    State(dispatcher): State<GuardedDispatcher>,
    body: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut session = SessionState::stateless(principal);
    let response = dispatcher.handle_text(&mut session, &body).await;

    let stream = stream::iter(into_events(response).into_iter().map(Ok));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)))
}

async fn get_mcp_stream(principal: Principal) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE stream opened by {}", principal);
    let connected = Event::default()
        .event("connected")
        .data(json!({ "message": "Stream connected" }).to_string());

    let stream = stream::once(async move { Ok::<_, Infallible>(connected) }).chain(stream::pending());
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)))
}

async fn mcp_ws(
    principal: Principal,
    State(dispatcher): State<GuardedDispatcher>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, principal))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: GuardedDispatcher, principal: Principal) {
    info!("WebSocket connected: {}", principal);
    metrics::websocket_opened();

    let mut session = SessionState::connection(principal);

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Some(response) = dispatcher.handle_text(&mut session, text.as_str()).await {
                    if socket
                        .send(Message::Text(response.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                warn!("Ignoring binary WebSocket frame");
            }
            Message::Close(_) => break,
            // Ping/Pong are answered by axum
            _ => {}
        }
    }

    metrics::websocket_closed();
    info!("WebSocket disconnected: {}", session.principal);
}

pub fn make_mcp_routes(state: ServerState) -> Router {
    Router::new()
        .route("/mcp", post(post_mcp))
        .route("/mcp/batch", post(post_mcp_batch))
        .route("/mcp/stream", post(post_mcp_stream).get(get_mcp_stream))
        .route("/mcp/ws", get(mcp_ws))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_end_with_done() {
        let events = into_events(Some(json!([{ "id": 1 }, { "id": 2 }])));
        assert_eq!(events.len(), 3);

        let events = into_events(Some(json!({ "id": 1 })));
        assert_eq!(events.len(), 2);

        let events = into_events(None);
        assert_eq!(events.len(), 1);
    }
}
