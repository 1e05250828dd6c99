//! BigQuery MCP Server Library
//!
//! This library exposes the internal modules for the server binary, the
//! deployment hooks binary and the end-to-end tests.

pub mod bigquery;
pub mod config;
pub mod deploy;
pub mod mcp;
pub mod server;
pub mod stdio;

// Re-export commonly used types for convenience
pub use bigquery::{BigQueryBackend, BigQueryClient};
pub use config::AppConfig;
pub use mcp::McpDispatcher;
pub use server::{run_server, RequestsLoggingLevel};
