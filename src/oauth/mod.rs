//! Upstream OAuth provider.
//!
//! Authorization-code exchange and refresh-token grants against the single
//! provider configured for this deployment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;

pub use client::HttpOAuthClient;

/// OAuth client errors
#[derive(Debug, Error)]
pub enum OAuthClientError {
    #[error("malformed token URI: {0}")]
    InvalidUri(String),

    #[error("failed to perform HTTP request: {0}")]
    Request(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("failed to exchange authorization code for token: {0}")]
    Exchange(#[source] Box<OAuthClientError>),

    #[error("failed to refresh token: {0}")]
    Refresh(#[source] Box<OAuthClientError>),
}

impl OAuthClientError {
    /// HTTP status returned by the provider, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            OAuthClientError::Status(code) => Some(*code),
            OAuthClientError::Exchange(inner) | OAuthClientError::Refresh(inner) => inner.status(),
            _ => None,
        }
    }
}

/// Token grant operations against the provider, generic over its response shape.
#[async_trait]
pub trait OAuthClient<T>: Send + Sync {
    /// Exchanges an authorization code for a token.
    async fn exchange(&self, code: &str) -> Result<T, OAuthClientError>;

    /// Exchanges a refresh token for a new token.
    async fn refresh(&self, refresh_token: &str) -> Result<T, OAuthClientError>;
}

/// Token response of the whiteboard provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToken {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub token_type: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub issued_at: i64,
    /// Lifetime in seconds, relative to the response
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("user_id", &self.user_id)
            .field("team_id", &self.team_id)
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_token_deserialization() {
        let json = r#"{
            "user_id": "3458764517517852417",
            "team_id": "3458764517517819000",
            "token_type": "bearer",
            "access_token": "eyJtaXJvLm9yaWdpbiI6ImV1MDEifQ_access",
            "refresh_token": "eyJtaXJvLm9yaWdpbiI6ImV1MDEifQ_refresh",
            "issued_at": 1700000000,
            "expires_in": 3599,
            "scope": "boards:read boards:write"
        }"#;

        let token: ProviderToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.team_id, "3458764517517819000");
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 3599);
        assert_eq!(token.scope, "boards:read boards:write");
    }

    #[test]
    fn test_provider_token_minimal() {
        let token: ProviderToken = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(token.access_token, "a");
        assert!(token.refresh_token.is_empty());
        assert_eq!(token.expires_in, 0);
    }

    #[test]
    fn test_provider_token_debug_redacts_tokens() {
        let token: ProviderToken =
            serde_json::from_str(r#"{"access_token":"secret-access","refresh_token":"secret-refresh"}"#)
                .unwrap();
        let debug = format!("{:?}", token);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }

    #[test]
    fn test_error_status() {
        let err = OAuthClientError::Refresh(Box::new(OAuthClientError::Status(401)));
        assert_eq!(err.status(), Some(401));
        assert_eq!(OAuthClientError::Request("timeout".to_string()).status(), None);
    }
}
