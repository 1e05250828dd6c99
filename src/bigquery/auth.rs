//! OAuth2 access tokens for the BigQuery API.
//!
//! Service account keys are exchanged through the JWT bearer grant; without a
//! key the metadata server of the hosting environment is asked instead.
//! Tokens are cached until shortly before they expire.

use std::time::{Duration, Instant};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::credentials::{Credentials, ServiceAccountKey};
use super::BigQueryError;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Credentials,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            cache: Mutex::new(None),
        }
    }

    /// Returns a valid access token, fetching a new one when needed.
    pub async fn access_token(&self) -> Result<String, BigQueryError> {
        if let Credentials::Static(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(cached.value.clone());
            }
        }

        let response = match &self.credentials {
            Credentials::ServiceAccount(key) => self.exchange_assertion(key).await?,
            Credentials::ApplicationDefault => self.fetch_from_metadata_server().await?,
            Credentials::Static(token) => return Ok(token.clone()),
        };
        debug!("Obtained access token valid for {}s", response.expires_in);

        let value = response.access_token;
        *cache = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }

    async fn exchange_assertion(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, BigQueryError> {
        let assertion = sign_assertion(key, chrono::Utc::now().timestamp())?;
        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BigQueryError::Auth(format!(
                "token exchange failed with status {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BigQueryError::Auth(format!("invalid token response: {}", e)))
    }

    async fn fetch_from_metadata_server(&self) -> Result<TokenResponse, BigQueryError> {
        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                BigQueryError::Auth(format!(
                    "no credentials configured and metadata server unreachable: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            return Err(BigQueryError::Auth(format!(
                "metadata server returned status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BigQueryError::Auth(format!("invalid metadata token response: {}", e)))
    }
}

/// Builds the RS256-signed JWT used in the bearer grant.
fn sign_assertion(key: &ServiceAccountKey, now: i64) -> Result<String, BigQueryError> {
    let client_email = key
        .client_email
        .as_deref()
        .ok_or_else(|| BigQueryError::Auth("service account key has no client_email".into()))?;
    let private_key = key
        .private_key
        .as_deref()
        .ok_or_else(|| BigQueryError::Auth("service account key has no private_key".into()))?;

    let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| BigQueryError::Auth(format!("invalid private key: {}", e)))?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let claims = AssertionClaims {
        iss: client_email,
        scope: BIGQUERY_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    encode(&header, &claims, &encoding_key)
        .map_err(|e| BigQueryError::Auth(format!("failed to sign assertion: {}", e)))
}
