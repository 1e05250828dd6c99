//! Google service account credentials.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const SERVICE_ACCOUNT_TYPE: &str = "service_account";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("Service account key is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Service account key is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported credential type '{0}', expected 'service_account'")]
    WrongType(String),

    #[error("Failed to read key file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The fields of a service account JSON key we care about.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "redacted"))
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ServiceAccountKey {
    pub fn parse(raw: &str) -> Result<Self, CredentialsError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CredentialsError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(CredentialsError::InvalidJson(
                "expected a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| CredentialsError::InvalidJson(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Checks what the server needs to authenticate: a service account key
    /// bound to a project.
    pub fn validate_for_server(&self) -> Result<(), CredentialsError> {
        match non_empty(&self.key_type) {
            Some(SERVICE_ACCOUNT_TYPE) => {}
            Some(other) => return Err(CredentialsError::WrongType(other.to_string())),
            None => return Err(CredentialsError::MissingField("type")),
        }
        if non_empty(&self.project_id).is_none() {
            return Err(CredentialsError::MissingField("project_id"));
        }
        Ok(())
    }

    /// Checks what the deployment hook publishes: the project and the
    /// identity. `type` is only checked when present.
    pub fn validate_for_deploy(&self) -> Result<(), CredentialsError> {
        if non_empty(&self.project_id).is_none() {
            return Err(CredentialsError::MissingField("project_id"));
        }
        if non_empty(&self.client_email).is_none() {
            return Err(CredentialsError::MissingField("client_email"));
        }
        if let Some(key_type) = non_empty(&self.key_type) {
            if key_type != SERVICE_ACCOUNT_TYPE {
                return Err(CredentialsError::WrongType(key_type.to_string()));
            }
        }
        Ok(())
    }

    pub fn project(&self) -> Option<&str> {
        non_empty(&self.project_id)
    }
}

/// How the BigQuery client obtains access tokens.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Sign JWT assertions with a service account key.
    ServiceAccount(ServiceAccountKey),
    /// Ask the GCE/Cloud Run metadata server.
    ApplicationDefault,
    /// A pre-issued bearer token, used as is.
    Static(String),
}

impl Credentials {
    /// Picks credentials the way Google client libraries do: explicit key
    /// file, then inline JSON, then a pre-issued token, then the file named
    /// by `GOOGLE_APPLICATION_CREDENTIALS`, then the metadata server.
    pub fn resolve(
        key_file: Option<&Path>,
        credentials_json: Option<&str>,
        access_token: Option<&str>,
        adc_file: Option<&Path>,
    ) -> Result<Self, CredentialsError> {
        if let Some(path) = key_file {
            return Ok(Self::ServiceAccount(ServiceAccountKey::from_file(path)?));
        }
        if let Some(json) = credentials_json {
            return Ok(Self::ServiceAccount(ServiceAccountKey::parse(json)?));
        }
        if let Some(token) = access_token {
            return Ok(Self::Static(token.to_string()));
        }
        if let Some(path) = adc_file {
            let key = ServiceAccountKey::from_file(path)?;
            if key.key_type.as_deref() == Some(SERVICE_ACCOUNT_TYPE) {
                return Ok(Self::ServiceAccount(key));
            }
        }
        Ok(Self::ApplicationDefault)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Credentials::ServiceAccount(_) => "service account key",
            Credentials::ApplicationDefault => "metadata server",
            Credentials::Static(_) => "static access token",
        }
    }
}
