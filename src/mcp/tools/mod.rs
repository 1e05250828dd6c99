//! MCP Tools

pub mod query;

use super::registry::McpRegistry;

/// Register all tools with the registry
pub fn register_all_tools(registry: &mut McpRegistry) {
    query::register_tools(registry);
}
