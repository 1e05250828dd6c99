//! MCP Tool Execution Context
//!
//! Provides access to the BigQuery backend and the caller's identity for
//! tool and resource implementations.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::bigquery::BigQueryBackend;

/// Who is making MCP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// HTTP caller while authentication is disabled.
    Anonymous,
    /// Authenticated with one of the configured API keys. Only a SHA-256
    /// fingerprint of the key is kept.
    ApiKey { fingerprint: String },
    /// Authenticated with a signed JWT.
    Jwt { subject: String },
    /// The local process on the other end of stdin/stdout.
    Stdio,
}

impl Principal {
    pub fn api_key(key: &str) -> Self {
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        Principal::ApiKey {
            fingerprint: digest[..12].to_string(),
        }
    }

    /// Key under which rate limits are tracked.
    pub fn rate_limit_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Anonymous => write!(f, "anonymous"),
            Principal::ApiKey { fingerprint } => write!(f, "api_key:{}", fingerprint),
            Principal::Jwt { subject } => write!(f, "jwt:{}", subject),
            Principal::Stdio => write!(f, "stdio"),
        }
    }
}

/// Context provided to tool and resource handlers during execution
#[derive(Clone)]
pub struct ToolContext {
    /// The caller
    pub principal: Principal,

    /// Access to BigQuery
    pub backend: Arc<dyn BigQueryBackend>,
}

impl ToolContext {
    pub fn project_id(&self) -> &str {
        self.backend.project_id()
    }
}
