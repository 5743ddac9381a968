//! Document server probe.
//!
//! Used when a board's settings are saved to check that the configured
//! document server is reachable, accepts the JWT secret and runs a
//! supported version.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Oldest supported document server release (major, minor)
pub const MIN_SUPPORTED_VERSION: (u32, u32) = (8, 2);

const SHARD_KEY_LENGTH: usize = 8;

/// Document server errors
#[derive(Debug, Error)]
pub enum DocServerError {
    #[error("malformed document server address: {0}")]
    InvalidAddress(String),

    #[error("failed to sign document server request: {0}")]
    Token(String),

    #[error("failed to reach document server: {0}")]
    Request(String),

    #[error("unexpected document server status {0}")]
    Status(u16),

    #[error("failed to decode document server response: {0}")]
    Decode(String),

    #[error("document server returned error code {0}")]
    Command(i64),

    #[error("invalid document server version format: {0}")]
    InvalidVersion(String),

    #[error("document server version {0} is not supported, 8.2 or newer is required")]
    UnsupportedVersion(String),
}

#[derive(Serialize)]
struct VersionClaims {
    c: &'static str,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct VersionRequest<'a> {
    c: &'static str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    version: String,
}

/// Queries a document server.
#[async_trait]
pub trait DocServerClient: Send + Sync {
    /// Returns the server's version string.
    ///
    /// # Arguments
    /// * `address` - Base URL of the document server
    /// * `header` - Header the server reads its JWT from
    /// * `secret` - Shared JWT secret
    async fn server_version(
        &self,
        address: &str,
        header: &str,
        secret: &str,
    ) -> Result<String, DocServerError>;
}

/// reqwest-backed [`DocServerClient`]
pub struct HttpDocServerClient {
    http: reqwest::Client,
}

impl HttpDocServerClient {
    pub fn new(timeout: std::time::Duration) -> Result<Self, DocServerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocServerError::Request(e.to_string()))?;

        Ok(Self { http })
    }
}

fn shard_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARD_KEY_LENGTH)
        .map(char::from)
        .collect()
}

fn sign_version_token(secret: &str) -> Result<String, DocServerError> {
    let now = Utc::now();
    let claims = VersionClaims {
        c: "version",
        iat: now.timestamp(),
        exp: (now + Duration::minutes(1)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| DocServerError::Token(e.to_string()))
}

#[async_trait]
impl DocServerClient for HttpDocServerClient {
    async fn server_version(
        &self,
        address: &str,
        header: &str,
        secret: &str,
    ) -> Result<String, DocServerError> {
        let base = address.trim_end_matches('/');
        let mut url = reqwest::Url::parse(&format!("{}/command", base))
            .map_err(|e| DocServerError::InvalidAddress(e.to_string()))?;
        url.query_pairs_mut().append_pair("shardKey", &shard_key());

        let token = sign_version_token(secret)?;

        debug!(address = %base, "Requesting document server version");

        let mut request = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .json(&VersionRequest {
                c: "version",
                token: &token,
            });
        if !header.is_empty() {
            request = request.header(header, token.as_str());
        }

        let response = request.send().await.map_err(|e| {
            error!(address = %base, error = %e, "Failed to reach document server");
            DocServerError::Request(e.to_string())
        })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DocServerError::Status(response.status().as_u16()));
        }

        let body: VersionResponse = response
            .json()
            .await
            .map_err(|e| DocServerError::Decode(e.to_string()))?;

        if body.error != 0 {
            return Err(DocServerError::Command(body.error));
        }

        Ok(body.version)
    }
}

/// Checks a `major.minor[.patch...]` version against [`MIN_SUPPORTED_VERSION`].
pub fn check_version(version: &str) -> Result<(), DocServerError> {
    let mut parts = version.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        return Err(DocServerError::InvalidVersion(version.to_string()));
    };

    let major: u32 = major
        .parse()
        .map_err(|_| DocServerError::InvalidVersion(version.to_string()))?;
    let minor: u32 = minor
        .parse()
        .map_err(|_| DocServerError::InvalidVersion(version.to_string()))?;

    if (major, minor) < MIN_SUPPORTED_VERSION {
        return Err(DocServerError::UnsupportedVersion(version.to_string()));
    }

    Ok(())
}
