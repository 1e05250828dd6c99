//! Table Schema Resources
//!
//! Every table and view of the project is exposed as
//! `bigquery://{project}/{dataset}/{table}/schema`.

use tracing::{debug, error, info};

use crate::bigquery::BigQueryError;
use crate::mcp::context::ToolContext;
use crate::mcp::protocol::{McpError, ResourceContent, ResourceDefinition};
use crate::mcp::registry::{
    McpRegistry, RegisteredResource, ResourceBuilder, ResourceListResult, ResourceResult,
};

pub const SCHEME: &str = "bigquery";
const SCHEMA_PATH: &str = "schema";
const MIME_TYPE: &str = "application/json";

pub const INVALID_URI_FORMAT: &str = "Invalid resource URI format";
pub const EXPECTED_SCHEMA_PATH: &str = "Invalid resource URI - expected schema path";

/// Register schema resources with the registry
pub fn register_resources(registry: &mut McpRegistry) {
    registry.register_resource(table_schema_resource());
}

fn table_schema_resource() -> RegisteredResource {
    ResourceBuilder::new("bigquery://{project}/{dataset}/{table}/schema", "Table schema")
        .description("Column names, types, modes and descriptions of a table or view")
        .mime_type(MIME_TYPE)
        .build(list_table_schemas, read_table_schema)
}

// ============================================================================
// URI handling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaUri {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl SchemaUri {
    pub fn to_uri(&self) -> String {
        format!(
            "{}://{}/{}/{}/{}",
            SCHEME, self.project_id, self.dataset_id, self.table_id, SCHEMA_PATH
        )
    }
}

/// Parses `bigquery://project/dataset/table/schema`.
pub fn parse_schema_uri(uri: &str) -> Result<SchemaUri, McpError> {
    let invalid = || McpError::InvalidParams(INVALID_URI_FORMAT.to_string());

    let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(invalid());
    }

    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return Err(invalid());
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let [dataset_id, table_id, schema] = segments.as_slice() else {
        return Err(invalid());
    };
    if dataset_id.is_empty() || table_id.is_empty() {
        return Err(invalid());
    }
    if *schema != SCHEMA_PATH {
        return Err(McpError::InvalidParams(EXPECTED_SCHEMA_PATH.to_string()));
    }

    let decode = |segment: &str| {
        urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .map_err(|_| invalid())
    };

    Ok(SchemaUri {
        project_id: decode(host)?,
        dataset_id: decode(*dataset_id)?,
        table_id: decode(*table_id)?,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_table_schemas(ctx: ToolContext) -> ResourceListResult {
    let datasets = ctx.backend.list_datasets().await.map_err(|e| {
        error!("Error listing datasets: {}", e);
        McpError::InternalError(e.to_string())
    })?;
    debug!("Found {} datasets", datasets.len());

    let mut resources = Vec::new();
    for dataset in datasets {
        let tables = ctx
            .backend
            .list_tables(&dataset.dataset_id)
            .await
            .map_err(|e| {
                error!("Error listing tables of {}: {}", dataset.dataset_id, e);
                McpError::InternalError(e.to_string())
            })?;
        debug!(
            "Found {} tables and views in dataset {}",
            tables.len(),
            dataset.dataset_id
        );

        for table in tables {
            let uri = SchemaUri {
                project_id: ctx.project_id().to_string(),
                dataset_id: table.dataset_id.clone(),
                table_id: table.table_id.clone(),
            };
            resources.push(ResourceDefinition {
                uri: uri.to_uri(),
                name: format!(
                    "\"{}.{}\" {} schema",
                    table.dataset_id,
                    table.table_id,
                    table.kind.resource_label()
                ),
                description: None,
                mime_type: Some(MIME_TYPE.to_string()),
            });
        }
    }

    info!("Total resources found: {}", resources.len());
    Ok(resources)
}

async fn read_table_schema(ctx: ToolContext, uri: String) -> ResourceResult {
    let target = parse_schema_uri(&uri)?;

    let schema = ctx
        .backend
        .get_table_schema(&target.project_id, &target.dataset_id, &target.table_id)
        .await
        .map_err(|e| match e {
            BigQueryError::NotFound(_) => McpError::ResourceNotFound(uri.clone()),
            other => {
                error!("Error reading {}: {}", uri, other);
                McpError::InternalError(other.to_string())
            }
        })?;

    let text = serde_json::to_string_pretty(&schema.fields)
        .map_err(|e| McpError::InternalError(e.to_string()))?;

    Ok(vec![ResourceContent {
        uri,
        mime_type: Some(MIME_TYPE.to_string()),
        text,
    }])
}
