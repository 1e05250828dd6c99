//! Query Tool
//!
//! Runs read-only SQL against BigQuery and returns the rows as JSON.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::bigquery::sql::{ensure_read_only, qualify_information_schema};
use crate::bigquery::QueryRequest;
use crate::mcp::context::ToolContext;
use crate::mcp::protocol::{McpError, ToolsCallResult};
use crate::mcp::registry::{McpRegistry, RegisteredTool, ToolBuilder, ToolCategory, ToolResult};
use crate::server::metrics;

pub const QUERY_TOOL: &str = "query";

/// 1 GB
pub const DEFAULT_MAXIMUM_BYTES_BILLED: u64 = 1_000_000_000;

/// Register query tools with the registry
pub fn register_tools(registry: &mut McpRegistry) {
    registry.register_tool(query_tool());
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryParams {
    sql: Option<String>,
    #[serde(default)]
    maximum_bytes_billed: Option<Value>,
}

fn query_tool() -> RegisteredTool {
    ToolBuilder::new(QUERY_TOOL)
        .description("Run a read-only BigQuery SQL query")
        .input_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "sql": {"type": "string"},
                "maximumBytesBilled": {
                    "type": "string",
                    "description": "Maximum bytes billed (default: 1GB)"
                }
            },
            "required": ["sql"]
        }))
        .category(ToolCategory::Query)
        .build(query_handler)
}

/// Accepts the limit as a decimal string or as a JSON integer.
fn parse_maximum_bytes_billed(value: Option<&Value>) -> Result<u64, McpError> {
    let invalid = || {
        McpError::InvalidParams("maximumBytesBilled must be a non-negative integer".to_string())
    };
    match value {
        None | Some(Value::Null) => Ok(DEFAULT_MAXIMUM_BYTES_BILLED),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

async fn query_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: QueryParams =
        serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let sql = params
        .sql
        .filter(|sql| !sql.trim().is_empty())
        .ok_or_else(|| McpError::InvalidParams("Missing required argument: sql".to_string()))?;
    let maximum_bytes_billed = parse_maximum_bytes_billed(params.maximum_bytes_billed.as_ref())?;

    if let Err(message) = ensure_read_only(&sql) {
        warn!("Rejected non read-only query from {}", ctx.principal);
        metrics::record_bigquery_query("rejected", None);
        return Ok(ToolsCallResult::error(message));
    }

    let sql = match qualify_information_schema(&sql, ctx.project_id()) {
        Ok(sql) => sql,
        Err(message) => {
            metrics::record_bigquery_query("rejected", None);
            return Ok(ToolsCallResult::error(message));
        }
    };

    info!(
        "Running query for {} (maximum bytes billed: {})",
        ctx.principal, maximum_bytes_billed
    );

    match ctx
        .backend
        .run_query(QueryRequest {
            sql,
            maximum_bytes_billed,
        })
        .await
    {
        Ok(output) => {
            metrics::record_bigquery_query("success", output.total_bytes_processed);
            ToolsCallResult::json(&output.rows)
                .map_err(|e| McpError::InternalError(e.to_string()))
        }
        Err(e) => {
            warn!("Query execution error: {}", e);
            metrics::record_bigquery_query("error", None);
            Ok(ToolsCallResult::error(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigquery::InMemoryBackend;
    use crate::mcp::context::Principal;
    use crate::mcp::protocol::ToolResultContent;
    use serde_json::json;
    use std::sync::Arc;

    fn context(backend: Arc<InMemoryBackend>) -> ToolContext {
        ToolContext {
            principal: Principal::Stdio,
            backend,
        }
    }

    fn text_of(result: &ToolsCallResult) -> &str {
        match &result.content[0] {
            ToolResultContent::Text { text } => text,
        }
    }

    #[test]
    fn maximum_bytes_billed_defaults_and_parses() {
        assert_eq!(
            parse_maximum_bytes_billed(None).unwrap(),
            DEFAULT_MAXIMUM_BYTES_BILLED
        );
        assert_eq!(parse_maximum_bytes_billed(Some(&json!("2048"))).unwrap(), 2048);
        assert_eq!(parse_maximum_bytes_billed(Some(&json!(4096))).unwrap(), 4096);
        assert!(parse_maximum_bytes_billed(Some(&json!("lots"))).is_err());
        assert!(parse_maximum_bytes_billed(Some(&json!(-1))).is_err());
    }

    #[tokio::test]
    async fn returns_rows_as_pretty_json() {
        let backend = Arc::new(InMemoryBackend::new("p").with_query_rows(vec![json!({"n": 1})]));
        let result = query_handler(context(backend.clone()), json!({"sql": "SELECT 1 AS n"}))
            .await
            .unwrap();

        assert!(result.is_error.is_none());
        assert_eq!(text_of(&result), "[\n  {\n    \"n\": 1\n  }\n]");

        let executed = backend.executed_queries();
        assert_eq!(executed[0].maximum_bytes_billed, DEFAULT_MAXIMUM_BYTES_BILLED);
    }

    #[tokio::test]
    async fn mutations_are_tool_errors_and_never_executed() {
        let backend = Arc::new(InMemoryBackend::new("p"));
        let result = query_handler(
            context(backend.clone()),
            json!({"sql": "DELETE FROM ds.t WHERE true"}),
        )
        .await
        .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "Only READ operations are allowed");
        assert!(backend.executed_queries().is_empty());
    }

    #[tokio::test]
    async fn information_schema_is_qualified_with_project() {
        let backend = Arc::new(InMemoryBackend::new("my-project"));
        query_handler(
            context(backend.clone()),
            json!({"sql": "SELECT table_name FROM sales.INFORMATION_SCHEMA.TABLES"}),
        )
        .await
        .unwrap();

        assert_eq!(
            backend.executed_queries()[0].sql,
            "SELECT table_name FROM `my-project.sales.INFORMATION_SCHEMA.TABLES`"
        );
    }

    #[tokio::test]
    async fn backend_failures_are_tool_errors() {
        let backend = Arc::new(InMemoryBackend::new("p").with_query_error("Syntax error at [1:1]"));
        let result = query_handler(context(backend), json!({"sql": "SELEC 1"}))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("Syntax error"));
    }

    #[tokio::test]
    async fn missing_sql_is_invalid_params() {
        let backend = Arc::new(InMemoryBackend::new("p"));
        let err = query_handler(context(backend), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }
}
