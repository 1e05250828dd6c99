//! HTTP client for the BigQuery v2 REST API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::auth::TokenProvider;
use super::credentials::Credentials;
use super::models::{
    rows_to_json, ApiErrorBody, DatasetList, DatasetRef, JobReference, QueryOutput, QueryRequest,
    QueryResponse, TableKind, TableList, TableResource, TableSchema, TableSummary,
};
use super::{BigQueryBackend, BigQueryError};
use crate::config::BigQuerySettings;

/// How long a single `jobs.query`/`jobs.getQueryResults` call waits server
/// side before returning an incomplete job.
const POLL_TIMEOUT_MS: u64 = 10_000;

pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    location: String,
    tokens: TokenProvider,
    query_timeout: Duration,
}

impl BigQueryClient {
    /// Create a new BigQuery client.
    ///
    /// # Arguments
    /// * `project_id` - Project that owns the jobs and is listed for resources
    /// * `location` - Location jobs run in (e.g. "US", "EU")
    /// * `credentials` - How access tokens are obtained
    /// * `settings` - API endpoint and timeouts
    pub fn new(
        project_id: String,
        location: String,
        credentials: Credentials,
        settings: &BigQuerySettings,
    ) -> Result<Self, BigQueryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        info!(
            "BigQuery client for project {} in {} using {}",
            project_id,
            location,
            credentials.describe()
        );

        Ok(Self {
            tokens: TokenProvider::new(http.clone(), credentials),
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            project_id,
            location,
            query_timeout: Duration::from_secs(settings.query_timeout_secs),
        })
    }

    fn project_url(&self, project_id: &str) -> String {
        format!("{}/projects/{}", self.base_url, urlencoding::encode(project_id))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, BigQueryError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, BigQueryError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, BigQueryError> {
        let url = format!(
            "{}/queries/{}",
            self.project_url(&job.project_id),
            urlencoding::encode(&job.job_id)
        );
        let location = job.location.as_ref().unwrap_or(&self.location);
        let mut query = vec![
            ("timeoutMs", POLL_TIMEOUT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
            ("location", location.clone()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.get_json(&url, &query).await
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BigQueryError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| BigQueryError::InvalidResponse(e.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);

    if status == reqwest::StatusCode::NOT_FOUND {
        Err(BigQueryError::NotFound(message))
    } else {
        Err(BigQueryError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn first_error(response: &QueryResponse) -> Option<BigQueryError> {
    response.errors.first().map(|e| BigQueryError::Api {
        status: 400,
        message: match &e.reason {
            Some(reason) => format!("{} ({})", e.message, reason),
            None => e.message.clone(),
        },
    })
}

#[async_trait]
impl BigQueryBackend for BigQueryClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, BigQueryError> {
        let url = format!("{}/datasets", self.project_url(&self.project_id));
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .iter()
                .map(|t| ("pageToken", t.clone()))
                .collect();
            let page: DatasetList = self.get_json(&url, &query).await?;
            datasets.extend(page.datasets.into_iter().map(|d| DatasetRef {
                project_id: d.dataset_reference.project_id,
                dataset_id: d.dataset_reference.dataset_id,
            }));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} datasets", datasets.len());
        Ok(datasets)
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableSummary>, BigQueryError> {
        let url = format!(
            "{}/datasets/{}/tables",
            self.project_url(&self.project_id),
            urlencoding::encode(dataset_id)
        );
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .iter()
                .map(|t| ("pageToken", t.clone()))
                .collect();
            let page: TableList = self.get_json(&url, &query).await?;
            tables.extend(page.tables.into_iter().map(|t| TableSummary {
                dataset_id: t.table_reference.dataset_id,
                table_id: t.table_reference.table_id,
                kind: t
                    .kind
                    .as_deref()
                    .map(TableKind::from_api)
                    .unwrap_or(TableKind::Table),
            }));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} tables in dataset {}", tables.len(), dataset_id);
        Ok(tables)
    }

    async fn get_table_schema(
        &self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<TableSchema, BigQueryError> {
        let url = format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(project_id),
            urlencoding::encode(dataset_id),
            urlencoding::encode(table_id)
        );
        let table: TableResource = self.get_json(&url, &[]).await?;

        Ok(TableSchema {
            project_id: table.table_reference.project_id,
            dataset_id: table.table_reference.dataset_id,
            table_id: table.table_reference.table_id,
            kind: table
                .kind
                .as_deref()
                .map(TableKind::from_api)
                .unwrap_or(TableKind::Table),
            fields: table.schema.unwrap_or_default().fields,
        })
    }

    async fn run_query(&self, request: QueryRequest) -> Result<QueryOutput, BigQueryError> {
        let url = format!("{}/queries", self.project_url(&self.project_id));
        let body = json!({
            "query": request.sql,
            "useLegacySql": false,
            "location": self.location,
            "maximumBytesBilled": request.maximum_bytes_billed.to_string(),
            "timeoutMs": POLL_TIMEOUT_MS,
            "formatOptions": { "useInt64Timestamp": true },
        });

        let started = Instant::now();
        let mut response: QueryResponse = self.post_json(&url, &body).await?;
        let job = response.job_reference.clone();

        while !response.job_complete {
            if started.elapsed() >= self.query_timeout {
                return Err(BigQueryError::Timeout(self.query_timeout.as_secs()));
            }
            let job = job.as_ref().ok_or_else(|| {
                BigQueryError::InvalidResponse("incomplete query without job reference".into())
            })?;
            debug!("Waiting for query job {}", job.job_id);
            response = self.get_query_results(job, None).await?;
        }

        if let Some(error) = first_error(&response) {
            return Err(error);
        }

        let fields = response.schema.take().unwrap_or_default().fields;
        let mut rows = rows_to_json(&fields, &response.rows);
        let mut page_token = response.page_token.take().filter(|t| !t.is_empty());

        while let Some(token) = page_token {
            let job = job.as_ref().ok_or_else(|| {
                BigQueryError::InvalidResponse("paged result without job reference".into())
            })?;
            let page = self.get_query_results(job, Some(&token)).await?;
            rows.extend(rows_to_json(&fields, &page.rows));
            page_token = page.page_token.filter(|t| !t.is_empty());
        }

        let output = QueryOutput {
            rows,
            job_id: job.map(|j| j.job_id),
            total_bytes_processed: response
                .total_bytes_processed
                .as_deref()
                .and_then(|b| b.parse().ok()),
            cache_hit: response.cache_hit.unwrap_or(false),
        };
        info!(
            "Query returned {} rows ({} bytes processed, cache hit: {})",
            output.rows.len(),
            output.total_bytes_processed.unwrap_or(0),
            output.cache_hit
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> BigQueryClient {
        let settings = BigQuerySettings {
            api_base_url: server.uri(),
            query_timeout_secs: 5,
            request_timeout_secs: 5,
        };
        BigQueryClient::new(
            "my-project".to_string(),
            "EU".to_string(),
            Credentials::Static("test-token".to_string()),
            &settings,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn lists_datasets_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/my-project/datasets"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasets": [{"datasetReference": {"projectId": "my-project", "datasetId": "b"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/my-project/datasets"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datasets": [{"datasetReference": {"projectId": "my-project", "datasetId": "a"}}],
                "nextPageToken": "next"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let datasets = client.list_datasets().await.unwrap();
        let ids: Vec<&str> = datasets.iter().map(|d| d.dataset_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn lists_tables_with_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/my-project/datasets/sales/tables"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tables": [
                    {"tableReference": {"projectId": "my-project", "datasetId": "sales", "tableId": "orders"}, "type": "TABLE"},
                    {"tableReference": {"projectId": "my-project", "datasetId": "sales", "tableId": "daily"}, "type": "VIEW"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tables = client.list_tables("sales").await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].kind, TableKind::Table);
        assert_eq!(tables[1].table_id, "daily");
        assert_eq!(tables[1].kind, TableKind::View);
    }

    #[tokio::test]
    async fn missing_table_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/my-project/datasets/sales/tables/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Not found: Table my-project:sales.nope"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_table_schema("my-project", "sales", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BigQueryError::NotFound(msg) if msg.contains("sales.nope")));
    }

    #[tokio::test]
    async fn runs_query_and_polls_until_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/my-project/queries"))
            .and(body_partial_json(json!({
                "query": "SELECT 1 AS n",
                "useLegacySql": false,
                "location": "EU",
                "maximumBytesBilled": "1000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": false,
                "jobReference": {"projectId": "my-project", "jobId": "job_1", "location": "EU"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/my-project/queries/job_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "jobReference": {"projectId": "my-project", "jobId": "job_1", "location": "EU"},
                "schema": {"fields": [{"name": "n", "type": "INTEGER", "mode": "NULLABLE"}]},
                "rows": [{"f": [{"v": "1"}]}],
                "totalBytesProcessed": "0",
                "cacheHit": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let output = client
            .run_query(QueryRequest {
                sql: "SELECT 1 AS n".to_string(),
                maximum_bytes_billed: 1000,
            })
            .await
            .unwrap();

        assert_eq!(output.rows, vec![json!({"n": 1})]);
        assert_eq!(output.job_id.as_deref(), Some("job_1"));
        assert!(output.cache_hit);
    }

    #[tokio::test]
    async fn query_api_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/my-project/queries"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Query exceeded limit for bytes billed"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .run_query(QueryRequest {
                sql: "SELECT * FROM big.table".to_string(),
                maximum_bytes_billed: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BigQueryError::Api { status: 400, ref message } if message.contains("bytes billed")
        ));
    }
}
