use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub key_file: Option<String>,
    pub http: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub openapi_path: Option<String>,

    // Feature configs
    pub auth: Option<AuthConfig>,
    pub rate_limit: Option<RateLimitFileConfig>,
    pub bigquery: Option<BigQueryConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: Option<bool>,
    pub api_keys: Option<Vec<String>>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateLimitFileConfig {
    pub query_per_minute: Option<u32>,
    pub read_per_minute: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BigQueryConfig {
    pub api_base_url: Option<String>,
    pub query_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
