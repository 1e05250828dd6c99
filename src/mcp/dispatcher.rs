//! MCP Request Dispatch
//!
//! One dispatch table shared by every transport. stdio, HTTP and WebSocket
//! only deal with framing and hand each decoded message to
//! [`McpDispatcher::handle_message`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::{Principal, ToolContext};
use super::protocol::{
    methods, InitializeParams, InitializeResult, McpError, McpRequest, McpResponse, PingResult,
    PromptsListResult, RequestId, ResourcesListResult, ResourcesReadParams, ResourcesReadResult,
    ToolsCallParams, ToolsListResult, JSONRPC_VERSION,
};
use super::rate_limit::{McpRateLimiter, RateLimitConfig};
use super::registry::{McpRegistry, ToolCategory};
use super::resources::schema::INVALID_URI_FORMAT;
use crate::bigquery::BigQueryBackend;
use crate::server::metrics;

/// Per-connection protocol state.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub principal: Principal,
    initialized: bool,
    require_initialize: bool,
}

impl SessionState {
    /// A long-lived connection (stdio, WebSocket): `initialize` must come
    /// before tools, resources and prompts.
    pub fn connection(principal: Principal) -> Self {
        Self {
            principal,
            initialized: false,
            require_initialize: true,
        }
    }

    /// A single HTTP request: there is no handshake to wait for.
    pub fn stateless(principal: Principal) -> Self {
        Self {
            principal,
            initialized: false,
            require_initialize: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

pub struct McpDispatcher {
    registry: Arc<McpRegistry>,
    rate_limiter: Arc<McpRateLimiter>,
    backend: Arc<dyn BigQueryBackend>,
}

impl McpDispatcher {
    /// Create the dispatcher with all tools and resources registered
    pub fn new(backend: Arc<dyn BigQueryBackend>, rate_limits: RateLimitConfig) -> Self {
        let mut registry = McpRegistry::new();
        super::tools::register_all_tools(&mut registry);
        super::resources::register_all_resources(&mut registry);

        info!(
            "MCP registry initialized with {} tools and {} resources",
            registry.tool_count(),
            registry.resource_count()
        );

        Self {
            registry: Arc::new(registry),
            rate_limiter: Arc::new(McpRateLimiter::new(rate_limits)),
            backend,
        }
    }

    /// Handle one text frame: a JSON-RPC message or batch. Unparseable text
    /// yields a parse error response.
    pub async fn handle_text(&self, session: &mut SessionState, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(message) => self.handle_message(session, message).await,
            Err(e) => {
                metrics::record_mcp_request("unknown", "parse_error");
                Some(McpResponse::error(None, McpError::ParseError(e.to_string())).to_value())
            }
        }
    }

    /// Handle a decoded JSON-RPC message or batch array. Returns `None` when
    /// nothing needs to be sent back (notifications only).
    pub async fn handle_message(&self, session: &mut SessionState, message: Value) -> Option<Value> {
        match message {
            Value::Array(messages) if messages.is_empty() => Some(
                McpResponse::error(None, McpError::InvalidRequest("Empty batch".to_string()))
                    .to_value(),
            ),
            Value::Array(messages) => {
                let responses = self.handle_batch(session, messages).await;
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            single => self
                .handle_single(session, single)
                .await
                .map(|r| r.to_value()),
        }
    }

    /// Handle messages in order, returning the responses of the ones that
    /// expect one.
    pub async fn handle_batch(&self, session: &mut SessionState, messages: Vec<Value>) -> Vec<Value> {
        let mut responses = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(response) = self.handle_single(session, message).await {
                responses.push(response.to_value());
            }
        }
        responses
    }

    async fn handle_single(&self, session: &mut SessionState, message: Value) -> Option<McpResponse> {
        let raw_id = message
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

        let request: McpRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                metrics::record_mcp_request("unknown", "invalid_request");
                return Some(McpResponse::error(
                    raw_id,
                    McpError::InvalidRequest(format!("Invalid request: {}", e)),
                ));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            metrics::record_mcp_request("unknown", "invalid_request");
            return Some(McpResponse::error(
                request.response_id(),
                McpError::InvalidRequest(format!(
                    "Unsupported jsonrpc version: {}",
                    request.jsonrpc
                )),
            ));
        }

        debug!("MCP {} from {}", request.method, session.principal);
        let result = self.dispatch(session, &request).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_mcp_request(method_label(&request.method), outcome);

        if request.is_notification() {
            if let Err(e) = result {
                debug!("Ignoring error for notification {}: {}", request.method, e.message());
            }
            return None;
        }

        Some(match result {
            Ok(value) => McpResponse::success(request.response_id(), value),
            Err(error) => McpResponse::error(request.response_id(), error),
        })
    }

    async fn dispatch(
        &self,
        session: &mut SessionState,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(session, request),
            methods::INITIALIZED => Ok(Value::Null),
            methods::PING => to_result(PingResult {}),
            methods::TOOLS_LIST => {
                ensure_initialized(session)?;
                to_result(ToolsListResult {
                    tools: self.registry.tool_definitions(),
                })
            }
            methods::TOOLS_CALL => {
                ensure_initialized(session)?;
                self.handle_tools_call(session, request).await
            }
            methods::RESOURCES_LIST => {
                ensure_initialized(session)?;
                self.handle_resources_list(session).await
            }
            methods::RESOURCES_READ => {
                ensure_initialized(session)?;
                self.handle_resources_read(session, request).await
            }
            methods::PROMPTS_LIST => {
                ensure_initialized(session)?;
                to_result(PromptsListResult {
                    prompts: Vec::new(),
                })
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn handle_initialize(
        &self,
        session: &mut SessionState,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        let params: InitializeParams = parse_params(request)?.unwrap_or_default();
        if let Some(client) = &params.client_info {
            info!(
                "MCP session initialized by {} {} (protocol {})",
                client.name,
                client.version.as_deref().unwrap_or("unknown"),
                params.protocol_version.as_deref().unwrap_or("unspecified")
            );
        }

        session.initialized = true;
        to_result(InitializeResult::for_this_server())
    }

    async fn handle_tools_call(
        &self,
        session: &SessionState,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        let params: ToolsCallParams = parse_params(request)?
            .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

        let tool = self
            .registry
            .get_tool(&params.name)
            .ok_or_else(|| McpError::InvalidParams(format!("Unknown tool: {}", params.name)))?;

        self.check_rate_limit(session, tool.category)?;

        let arguments = params
            .arguments
            .unwrap_or_else(|| Value::Object(Default::default()));
        let result = (tool.handler)(self.context(session), arguments).await?;

        to_result(result)
    }

    async fn handle_resources_list(&self, session: &SessionState) -> Result<Value, McpError> {
        self.check_rate_limit(session, ToolCategory::Read)?;

        let mut resources = Vec::new();
        for resource in self.registry.resources() {
            resources.extend((resource.lister)(self.context(session)).await?);
        }

        to_result(ResourcesListResult { resources })
    }

    async fn handle_resources_read(
        &self,
        session: &SessionState,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        let params: ResourcesReadParams = parse_params(request)?
            .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

        let resource = self
            .registry
            .find_resource(&params.uri)
            .ok_or_else(|| McpError::InvalidParams(INVALID_URI_FORMAT.to_string()))?;

        self.check_rate_limit(session, ToolCategory::Read)?;

        let contents = (resource.handler)(self.context(session), params.uri).await?;
        to_result(ResourcesReadResult { contents })
    }

    fn check_rate_limit(
        &self,
        session: &SessionState,
        category: ToolCategory,
    ) -> Result<(), McpError> {
        let key = session.principal.rate_limit_key();
        self.rate_limiter
            .check_and_record(&key, category)
            .map_err(|retry_after_secs| {
                let (queries, reads) = self.rate_limiter.get_usage(&key).unwrap_or_default();
                warn!(
                    "Rate limit hit for {} ({} calls, usage: {} queries, {} reads)",
                    session.principal,
                    category.as_str(),
                    queries,
                    reads
                );
                metrics::record_rate_limit_hit(category.as_str());
                McpError::RateLimited { retry_after_secs }
            })
    }

    fn context(&self, session: &SessionState) -> ToolContext {
        ToolContext {
            principal: session.principal.clone(),
            backend: self.backend.clone(),
        }
    }
}

fn ensure_initialized(session: &SessionState) -> Result<(), McpError> {
    if session.require_initialize && !session.initialized {
        Err(McpError::InvalidRequest("Not initialized".to_string()))
    } else {
        Ok(())
    }
}

fn parse_params<T: DeserializeOwned>(request: &McpRequest) -> Result<Option<T>, McpError> {
    request
        .params
        .clone()
        .filter(|p| !p.is_null())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

/// Keeps the metrics label set bounded.
fn method_label(method: &str) -> &'static str {
    match method {
        methods::INITIALIZE => methods::INITIALIZE,
        methods::INITIALIZED => methods::INITIALIZED,
        methods::PING => methods::PING,
        methods::TOOLS_LIST => methods::TOOLS_LIST,
        methods::TOOLS_CALL => methods::TOOLS_CALL,
        methods::RESOURCES_LIST => methods::RESOURCES_LIST,
        methods::RESOURCES_READ => methods::RESOURCES_READ,
        methods::PROMPTS_LIST => methods::PROMPTS_LIST,
        _ => "unknown",
    }
}
