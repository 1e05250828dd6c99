use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bigquery_mcp_server::bigquery::{BigQueryBackend, BigQueryClient};
use bigquery_mcp_server::config::{AppConfig, CliConfig, EnvConfig, FileConfig};
use bigquery_mcp_server::mcp::McpDispatcher;
use bigquery_mcp_server::server::{self, RequestsLoggingLevel};
use bigquery_mcp_server::stdio::run_stdio;

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version, about = "MCP server exposing read-only access to Google BigQuery")]
struct CliArgs {
    /// Google Cloud project id. Falls back to GOOGLE_CLOUD_PROJECT.
    #[clap(long)]
    pub project_id: Option<String>,

    /// BigQuery location used for queries.
    #[clap(long, default_value = "US")]
    pub location: String,

    /// Path to a service account key file.
    #[clap(long, value_parser = parse_path)]
    pub key_file: Option<PathBuf>,

    /// Serve MCP over HTTP instead of stdio.
    #[clap(long)]
    pub http: bool,

    /// The address to listen on in HTTP mode.
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// The port to listen on in HTTP mode.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// OpenAPI document served at /openapi.yaml.
    #[clap(long, value_parser = parse_path)]
    pub openapi_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override command line flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            project_id: args.project_id.clone(),
            location: args.location.clone(),
            key_file: args.key_file.clone(),
            http: args.http,
            host: args.host.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            openapi_path: args.openapi_path.clone(),
        }
    }
}

/// Loads `.env` (or the given file) into the process environment. Runs
/// before logging is set up so that `LOG_LEVEL` can come from the file.
fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|_| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context("Failed to load .env file"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let dotenv_path = load_dotenv(None)?;

    // stdout is reserved for JSON-RPC frames in stdio mode
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some(path) = dotenv_path {
        info!("Loaded environment from {:?}", path);
    }

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let config = AppConfig::resolve(
        &CliConfig::from(&cli_args),
        &EnvConfig::from_env(),
        file_config,
    )?;

    info!(
        "Using BigQuery project {} in {} ({})",
        config.project_id,
        config.location,
        config.credentials.describe()
    );

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let backend: Arc<dyn BigQueryBackend> = Arc::new(
        BigQueryClient::new(
            config.project_id.clone(),
            config.location.clone(),
            config.credentials.clone(),
            &config.bigquery,
        )
        .context("Failed to create BigQuery client")?,
    );

    if config.http {
        server::run_server(&config, backend).await
    } else {
        let dispatcher = McpDispatcher::new(backend, config.rate_limits.clone());
        run_stdio(dispatcher).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dotenv_values_are_visible_before_logging_setup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BQ_MCP_DOTENV_LOG_LEVEL=debug").unwrap();

        let loaded = load_dotenv(Some(file.path())).unwrap();
        assert_eq!(loaded.as_deref(), Some(file.path()));
        assert_eq!(std::env::var("BQ_MCP_DOTENV_LOG_LEVEL").unwrap(), "debug");
    }

    #[test]
    fn missing_dotenv_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_dotenv(Some(&dir.path().join(".env"))).unwrap();
        assert!(loaded.is_none());
    }
}
