//! Caller authentication for the MCP routes.
//!
//! When authentication is enabled every MCP route extracts a [`Principal`];
//! requests without a valid API key or JWT are rejected before reaching the
//! dispatcher.

use super::state::ServerState;
use crate::config::AuthSettings;
use crate::mcp::{McpError, McpResponse, Principal};

use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const QUERY_ACCESS_TOKEN: &str = "access_token";

const JWT_LEEWAY_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("No credentials provided")]
    MissingCredentials,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        debug!("Rejecting request: {}", self);
        let body = McpResponse::error(None, McpError::Unauthorized).to_value();
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(body),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

fn extract_token_from_api_key_header(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HEADER_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_token_from_bearer(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim().to_string()).filter(|s| !s.is_empty())
}

fn extract_token_from_query(parts: &Parts) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params
        .get(QUERY_ACCESS_TOKEN)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Credentials are looked up in `X-API-Key`, then `Authorization: Bearer`,
/// then the `access_token` query parameter.
fn extract_token(parts: &Parts) -> Option<String> {
    extract_token_from_api_key_header(parts)
        .or_else(|| extract_token_from_bearer(parts))
        .or_else(|| extract_token_from_query(parts))
}

fn validate_jwt(secret: &str, token: &str) -> Result<Principal, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = JWT_LEEWAY_SECS;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::InvalidToken(e.to_string()),
    })?;

    let subject = data.claims.sub.unwrap_or_else(|| "unknown".to_string());
    Ok(Principal::Jwt { subject })
}

/// Compares two digests without stopping at the first differing byte.
fn digests_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Resolves the principal for a presented token.
pub fn authenticate(settings: &AuthSettings, token: Option<&str>) -> Result<Principal, AuthError> {
    if !settings.enabled {
        return Ok(Principal::Anonymous);
    }

    let token = token.ok_or(AuthError::MissingCredentials)?;

    let presented = Sha256::digest(token.as_bytes());
    let matched = settings
        .api_keys
        .iter()
        .fold(false, |found, key| {
            found | digests_equal(&Sha256::digest(key.as_bytes()), &presented)
        });
    if matched {
        return Ok(Principal::api_key(token));
    }

    match &settings.jwt_secret {
        Some(secret) => validate_jwt(secret, token),
        None => Err(AuthError::InvalidApiKey),
    }
}

impl FromRequestParts<ServerState> for Principal {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = if ctx.auth.enabled {
            extract_token(parts)
        } else {
            None
        };
        let principal = authenticate(&ctx.auth, token.as_deref())?;
        debug!("Authenticated request as {}", principal);
        Ok(principal)
    }
}
