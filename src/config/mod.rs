mod file_config;

pub use file_config::{AuthConfig, BigQueryConfig, FileConfig, RateLimitFileConfig};

use crate::bigquery::{Credentials, ServiceAccountKey};
use crate::mcp::RateLimitConfig;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

lazy_static! {
    static ref PROJECT_ID: Regex = Regex::new(r"^[a-z0-9-]+$").expect("project id pattern");
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub project_id: Option<String>,
    pub location: String,
    pub key_file: Option<PathBuf>,
    pub http: bool,
    pub host: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub openapi_path: Option<PathBuf>,
}

/// Values taken from the process environment. These have the lowest
/// precedence.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub google_cloud_project: Option<String>,
    pub credentials_json: Option<String>,
    pub adc_file: Option<PathBuf>,
    pub access_token: Option<String>,
    pub enable_auth: Option<String>,
    pub api_keys: Option<String>,
    pub jwt_secret: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            google_cloud_project: get("GOOGLE_CLOUD_PROJECT"),
            credentials_json: get("GOOGLE_APPLICATION_CREDENTIALS_JSON"),
            adc_file: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            access_token: get("BIGQUERY_ACCESS_TOKEN"),
            enable_auth: get("ENABLE_AUTH"),
            api_keys: get("API_KEYS"),
            jwt_secret: get("JWT_SECRET"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub project_id: String,
    pub location: String,
    pub credentials: Credentials,
    pub http: bool,
    pub host: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub openapi_path: Option<PathBuf>,

    // Feature configs (with defaults)
    pub auth: AuthSettings,
    pub rate_limits: RateLimitConfig,
    pub bigquery: BigQuerySettings,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_keys: Vec<String>,
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("enabled", &self.enabled)
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "redacted"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigQuerySettings {
    pub api_base_url: String,
    pub query_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BigQuerySettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            query_timeout_secs: 300,
            request_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from TOML file config, CLI arguments and the
    /// environment, in that order of precedence.
    pub fn resolve(cli: &CliConfig, env: &EnvConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let project_id = file
            .project_id
            .or_else(|| cli.project_id.clone())
            .or_else(|| env.google_cloud_project.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Missing required argument: --project-id or GOOGLE_CLOUD_PROJECT environment variable"
                )
            })?;
        if !PROJECT_ID.is_match(&project_id) {
            bail!("Invalid project ID format: {}", project_id);
        }

        let location = file.location.unwrap_or_else(|| cli.location.clone());
        let http = file.http.unwrap_or(cli.http);
        let host = file.host.unwrap_or_else(|| cli.host.clone());
        let port = file.port.unwrap_or(cli.port);

        let logging_level = match file.logging_level {
            Some(level) => parse_logging_level(&level)
                .ok_or_else(|| anyhow::anyhow!("Invalid logging_level: {}", level))?,
            None => cli.logging_level.clone(),
        };

        let openapi_path = file
            .openapi_path
            .map(PathBuf::from)
            .or_else(|| cli.openapi_path.clone());

        let key_file = file.key_file.map(PathBuf::from).or_else(|| cli.key_file.clone());
        let credentials = resolve_credentials(key_file.as_deref(), env)?;

        let auth = resolve_auth(file.auth.unwrap_or_default(), env)?;

        let rl_file = file.rate_limit.unwrap_or_default();
        let rl_default = RateLimitConfig::default();
        let rate_limits = RateLimitConfig {
            query_per_minute: rl_file
                .query_per_minute
                .unwrap_or(rl_default.query_per_minute),
            read_per_minute: rl_file.read_per_minute.unwrap_or(rl_default.read_per_minute),
        };

        let bq_file = file.bigquery.unwrap_or_default();
        let bq_default = BigQuerySettings::default();
        let bigquery = BigQuerySettings {
            api_base_url: bq_file.api_base_url.unwrap_or(bq_default.api_base_url),
            query_timeout_secs: bq_file
                .query_timeout_secs
                .unwrap_or(bq_default.query_timeout_secs),
            request_timeout_secs: bq_file
                .request_timeout_secs
                .unwrap_or(bq_default.request_timeout_secs),
        };

        Ok(Self {
            project_id,
            location,
            credentials,
            http,
            host,
            port,
            logging_level,
            openapi_path,
            auth,
            rate_limits,
            bigquery,
        })
    }
}

/// Checks a key file the way the server needs it: an existing, readable
/// file holding a service account key bound to a project.
fn load_key_file(path: &Path) -> Result<ServiceAccountKey> {
    if !path.exists() {
        bail!("Key file not found: {:?}", path);
    }
    if !path.is_file() {
        bail!("Key file path is not a file: {:?}", path);
    }
    let key = ServiceAccountKey::from_file(path)
        .with_context(|| format!("Invalid service account key file: {:?}", path))?;
    key.validate_for_server()
        .with_context(|| format!("Invalid service account key file format: {:?}", path))?;
    Ok(key)
}

fn resolve_credentials(key_file: Option<&Path>, env: &EnvConfig) -> Result<Credentials> {
    if let Some(path) = key_file {
        return Ok(Credentials::ServiceAccount(load_key_file(path)?));
    }
    if let Some(json) = &env.credentials_json {
        let key = ServiceAccountKey::parse(json).context(
            "Invalid JSON in GOOGLE_APPLICATION_CREDENTIALS_JSON environment variable",
        )?;
        key.validate_for_server()
            .context("Invalid service account credentials format")?;
        return Ok(Credentials::ServiceAccount(key));
    }
    Credentials::resolve(
        None,
        None,
        env.access_token.as_deref(),
        env.adc_file.as_deref(),
    )
    .context("Failed to load application default credentials")
}

fn resolve_auth(file: AuthConfig, env: &EnvConfig) -> Result<AuthSettings> {
    let enabled = match file.enabled {
        Some(enabled) => enabled,
        None => env.enable_auth.as_deref().map(is_truthy).unwrap_or(false),
    };

    let api_keys: Vec<String> = file
        .api_keys
        .unwrap_or_else(|| env.api_keys.as_deref().map(split_api_keys).unwrap_or_default())
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    let jwt_secret = file
        .jwt_secret
        .or_else(|| env.jwt_secret.clone())
        .filter(|s| !s.is_empty());

    if enabled && api_keys.is_empty() && jwt_secret.is_none() {
        bail!("Authentication is enabled but no API_KEYS or JWT_SECRET is configured");
    }

    Ok(AuthSettings {
        enabled,
        api_keys,
        jwt_secret,
    })
}

fn split_api_keys(raw: &str) -> Vec<String> {
    raw.split(',').map(|k| k.to_string()).collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
