//! reqwest-backed OAuth client.

use super::{OAuthClient, OAuthClientError};
use crate::config::OAuthConfig;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, error, info};

/// Talks to the provider's token endpoint.
///
/// Grant parameters are sent both in the query string and as a
/// form-encoded body; the provider reads the query, standard OAuth servers
/// read the body.
pub struct HttpOAuthClient<T> {
    config: OAuthConfig,
    token_uri: Url,
    http: reqwest::Client,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HttpOAuthClient<T> {
    /// Creates a client from validated OAuth configuration.
    ///
    /// # Arguments
    /// * `config` - Provider credentials and endpoints
    ///
    /// # Returns
    /// * `Err(OAuthClientError::InvalidUri)` - If the token URI cannot be parsed
    /// * `Err(OAuthClientError::Request)` - If the HTTP client cannot be built
    pub fn new(config: OAuthConfig) -> Result<Self, OAuthClientError> {
        let token_uri = Url::parse(&config.token_uri)
            .map_err(|e| OAuthClientError::InvalidUri(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| OAuthClientError::Request(e.to_string()))?;

        Ok(Self {
            config,
            token_uri,
            http,
            _marker: PhantomData,
        })
    }
}

impl<T: DeserializeOwned> HttpOAuthClient<T> {
    async fn post_grant(
        &self,
        query: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> Result<T, OAuthClientError> {
        debug!(url = %self.token_uri, "Making OAuth request");

        let response = self
            .http
            .post(self.token_uri.clone())
            .header("Accept", "application/json")
            .query(query)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send OAuth request");
                OAuthClientError::Request(e.to_string())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            error!(status_code = status.as_u16(), "OAuth request failed");
            return Err(OAuthClientError::Status(status.as_u16()));
        }

        response.json::<T>().await.map_err(|e| {
            error!(error = %e, "Failed to decode OAuth response");
            OAuthClientError::Decode(e.to_string())
        })
    }
}

#[async_trait]
impl<T> OAuthClient<T> for HttpOAuthClient<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn exchange(&self, code: &str) -> Result<T, OAuthClientError> {
        debug!("Exchanging authorization code for token");

        let config = &self.config;
        let query = [
            ("client_id", config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];

        let token = self
            .post_grant(&query, &form)
            .await
            .map_err(|e| OAuthClientError::Exchange(Box::new(e)))?;

        debug!("Token exchange successful");
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<T, OAuthClientError> {
        info!("Refreshing token");

        let config = &self.config;
        let query = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
        ];

        let token = self
            .post_grant(&query, &form)
            .await
            .map_err(|e| OAuthClientError::Refresh(Box::new(e)))?;

        debug!("Token refresh successful");
        Ok(token)
    }
}
