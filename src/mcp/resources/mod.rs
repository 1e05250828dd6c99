//! MCP Resources

pub mod schema;

use super::registry::McpRegistry;

/// Register all resources with the registry
pub fn register_all_resources(registry: &mut McpRegistry) {
    schema::register_resources(registry);
}
