//! MCP (Model Context Protocol) Server
//!
//! Exposes BigQuery to LLM clients: a `query` tool for read-only SQL and
//! one schema resource per table or view.
//!
//! ## Architecture
//!
//! - Dispatch: a single method table ([`McpDispatcher`]) used by all transports
//! - Transports: stdio, HTTP POST, SSE and WebSocket (see `crate::server`)
//! - Tools: `query`, rate limited per principal
//! - Resources: `bigquery://{project}/{dataset}/{table}/schema`

pub mod context;
pub mod dispatcher;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod resources;
pub mod tools;

pub use context::{Principal, ToolContext};
pub use dispatcher::{McpDispatcher, SessionState};
pub use protocol::{McpError, McpRequest, McpResponse};
pub use rate_limit::RateLimitConfig;
pub use registry::McpRegistry;
