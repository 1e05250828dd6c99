//! BigQuery access
//!
//! A small REST client for the BigQuery v2 API covering exactly what the MCP
//! surface needs: dataset/table listing, table schemas and read-only queries.
//! Everything above this module talks to the [`BigQueryBackend`] trait so the
//! transports can be exercised without a Google project.

mod auth;
mod client;
pub mod credentials;
pub mod memory;
pub mod models;
pub mod sql;

use async_trait::async_trait;
use thiserror::Error;

pub use auth::TokenProvider;
pub use client::BigQueryClient;
pub use credentials::{Credentials, CredentialsError, ServiceAccountKey};
pub use memory::InMemoryBackend;
pub use models::{DatasetRef, QueryOutput, QueryRequest, SchemaField, TableKind, TableSchema, TableSummary};

/// Errors returned by BigQuery operations.
#[derive(Debug, Error)]
pub enum BigQueryError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query did not complete within {0} seconds")]
    Timeout(u64),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// Operations the MCP layer needs from BigQuery.
#[async_trait]
pub trait BigQueryBackend: Send + Sync {
    /// The project queries run in and resources are listed for.
    fn project_id(&self) -> &str;

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, BigQueryError>;

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableSummary>, BigQueryError>;

    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, BigQueryError>;

    async fn run_query(&self, request: QueryRequest) -> Result<QueryOutput, BigQueryError>;
}
