//! BigQuery model types
//!
//! Public types exchanged with the MCP layer, the REST payloads of the
//! BigQuery v2 API, and the conversion of query rows (the API's `f`/`v`
//! cell encoding) into plain JSON objects.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
    MaterializedView,
    External,
    Snapshot,
    Other,
}

impl TableKind {
    pub fn from_api(value: &str) -> Self {
        match value {
            "TABLE" => TableKind::Table,
            "VIEW" => TableKind::View,
            "MATERIALIZED_VIEW" => TableKind::MaterializedView,
            "EXTERNAL" => TableKind::External,
            "SNAPSHOT" => TableKind::Snapshot,
            _ => TableKind::Other,
        }
    }

    /// Label used in resource names. Only logical views are called views.
    pub fn resource_label(&self) -> &'static str {
        match self {
            TableKind::View => "view",
            _ => "table",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub dataset_id: String,
    pub table_id: String,
    pub kind: TableKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<SchemaField>>,
}

fn default_mode() -> String {
    "NULLABLE".to_string()
}

impl SchemaField {
    /// A nullable scalar column.
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: default_mode(),
            description: None,
            fields: None,
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REPEATED")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    pub kind: TableKind,
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub maximum_bytes_billed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub job_id: Option<String>,
    pub total_bytes_processed: Option<u64>,
    pub cache_hit: bool,
}

// ============================================================================
// REST payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetList {
    #[serde(default)]
    pub datasets: Vec<DatasetListItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetListItem {
    pub dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableList {
    #[serde(default)]
    pub tables: Vec<TableListItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableListItem {
    pub table_reference: TableReference,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableResource {
    pub table_reference: TableReference,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub schema: Option<RestSchema>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RestSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Response of both `jobs.query` and `jobs.getQueryResults`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    pub job_reference: Option<JobReference>,
    pub schema: Option<RestSchema>,
    #[serde(default)]
    pub rows: Vec<Row>,
    pub page_token: Option<String>,
    pub total_bytes_processed: Option<String>,
    pub cache_hit: Option<bool>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Row {
    #[serde(default)]
    pub f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Cell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Row conversion
// ============================================================================

/// Converts API rows into JSON objects keyed by column name.
pub(crate) fn rows_to_json(fields: &[SchemaField], rows: &[Row]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let cells: Vec<&Value> = row.f.iter().map(|c| &c.v).collect();
            Value::Object(record_to_object(fields, &cells))
        })
        .collect()
}

fn record_to_object(fields: &[SchemaField], cells: &[&Value]) -> Map<String, Value> {
    let mut object = Map::with_capacity(fields.len());
    for (index, field) in fields.iter().enumerate() {
        let value = cells
            .get(index)
            .map(|raw| convert_cell(field, raw))
            .unwrap_or(Value::Null);
        object.insert(field.name.clone(), value);
    }
    object
}

fn convert_cell(field: &SchemaField, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    if field.is_repeated() {
        // Repeated values arrive as [{"v": ...}, ...]
        let items = raw.as_array().map(Vec::as_slice).unwrap_or(&[]);
        return Value::Array(
            items
                .iter()
                .map(|item| convert_value(field, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        );
    }
    convert_value(field, raw)
}

fn convert_value(field: &SchemaField, raw: &Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    match field.field_type.to_ascii_uppercase().as_str() {
        "RECORD" | "STRUCT" => {
            let nested = field.fields.as_deref().unwrap_or(&[]);
            let cells: Vec<&Value> = raw
                .get("f")
                .and_then(Value::as_array)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| c.get("v").unwrap_or(&Value::Null))
                        .collect()
                })
                .unwrap_or_default();
            Value::Object(record_to_object(nested, &cells))
        }
        "INTEGER" | "INT64" => raw
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| raw.clone()),
        "FLOAT" | "FLOAT64" => raw
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| raw.clone()),
        "BOOLEAN" | "BOOL" => match raw.as_str() {
            Some(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Some(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => raw.clone(),
        },
        "TIMESTAMP" => raw
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .unwrap_or_else(|| raw.clone()),
        _ => raw.clone(),
    }
}

/// Timestamps come back as integer microseconds when `useInt64Timestamp` is
/// set, and as floating point seconds otherwise.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(micros) = value.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_micros(micros);
    }
    let seconds = value.parse::<f64>().ok()?;
    DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}
