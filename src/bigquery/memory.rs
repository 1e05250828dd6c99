//! In-process BigQuery backend serving fixed datasets and query results.
//!
//! Used by the test suites and for running the server without a Google
//! Cloud project.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::models::{
    DatasetRef, QueryOutput, QueryRequest, SchemaField, TableKind, TableSchema, TableSummary,
};
use super::{BigQueryBackend, BigQueryError};

enum CannedQuery {
    Rows(Vec<Value>),
    Error(String),
}

pub struct InMemoryBackend {
    project_id: String,
    datasets: BTreeMap<String, Vec<TableSchema>>,
    query_result: CannedQuery,
    executed: Mutex<Vec<QueryRequest>>,
}

impl InMemoryBackend {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            datasets: BTreeMap::new(),
            query_result: CannedQuery::Rows(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_table(
        mut self,
        dataset_id: &str,
        table_id: &str,
        kind: TableKind,
        fields: Vec<SchemaField>,
    ) -> Self {
        let schema = TableSchema {
            project_id: self.project_id.clone(),
            dataset_id: dataset_id.to_string(),
            table_id: table_id.to_string(),
            kind,
            fields,
        };
        self.datasets
            .entry(dataset_id.to_string())
            .or_default()
            .push(schema);
        self
    }

    /// Every query returns these rows.
    pub fn with_query_rows(mut self, rows: Vec<Value>) -> Self {
        self.query_result = CannedQuery::Rows(rows);
        self
    }

    /// Every query fails with an API error carrying this message.
    pub fn with_query_error(mut self, message: impl Into<String>) -> Self {
        self.query_result = CannedQuery::Error(message.into());
        self
    }

    /// Queries received so far, in order.
    pub fn executed_queries(&self) -> Vec<QueryRequest> {
        self.executed
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BigQueryBackend for InMemoryBackend {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, BigQueryError> {
        Ok(self
            .datasets
            .keys()
            .map(|dataset_id| DatasetRef {
                project_id: self.project_id.clone(),
                dataset_id: dataset_id.clone(),
            })
            .collect())
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableSummary>, BigQueryError> {
        let tables = self
            .datasets
            .get(dataset_id)
            .ok_or_else(|| BigQueryError::NotFound(format!("Dataset {}", dataset_id)))?;
        Ok(tables
            .iter()
            .map(|t| TableSummary {
                dataset_id: t.dataset_id.clone(),
                table_id: t.table_id.clone(),
                kind: t.kind,
            })
            .collect())
    }

    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, BigQueryError> {
        let not_found =
            || BigQueryError::NotFound(format!("Table {}:{}.{}", project_id, dataset_id, table_id));
        if project_id != self.project_id {
            return Err(not_found());
        }
        self.datasets
            .get(dataset_id)
            .and_then(|tables| tables.iter().find(|t| t.table_id == table_id))
            .cloned()
            .ok_or_else(not_found)
    }

    async fn run_query(&self, request: QueryRequest) -> Result<QueryOutput, BigQueryError> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(request);
        }
        match &self.query_result {
            CannedQuery::Rows(rows) => Ok(QueryOutput {
                rows: rows.clone(),
                job_id: Some("in-memory".to_string()),
                total_bytes_processed: Some(0),
                cache_hit: false,
            }),
            CannedQuery::Error(message) => Err(BigQueryError::Api {
                status: 400,
                message: message.clone(),
            }),
        }
    }
}
