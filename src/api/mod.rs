//! HTTP API
//!
//! - `GET /oauth/install` - provider redirect after the app is installed
//! - `GET /api/authentication` - caller's token status, refreshing if needed
//! - `GET|POST /api/settings` - board document server settings
//! - `GET /health`

pub mod authentication;
pub mod install;
pub mod settings;

use crate::auth::{authenticate, Claims};
use crate::credentials::TokenService;
use crate::oauth::ProviderToken;
use crate::settings::SettingsService;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, warn};

pub use authentication::create_authentication_router;
pub use install::create_install_router;
pub use settings::create_settings_router;

/// Shared application state
pub struct AppState {
    pub tokens: Arc<TokenService<ProviderToken>>,
    pub settings: Arc<SettingsService>,
    /// Verifies caller tokens issued by the platform
    pub client_secret: String,
    /// Where users are sent to (re)install the app
    pub authorization_url: String,
    /// Where the install callback redirects on success
    pub application_url: String,
    pub request_timeout: Duration,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_url: Option<String>,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Installation failed; carries the URL to retry it at
    InstallFailed(String),
    /// Caller must (re)authorize; carries the URL to send them to
    Reauthorize(String),
    Unauthorized(String),
    ServerError(String),
    Timeout,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, authorization_url) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::InstallFailed(url) => (
                StatusCode::BAD_REQUEST,
                "Installation failed".to_string(),
                Some(url),
            ),
            AppError::Reauthorize(url) => (
                StatusCode::UNAUTHORIZED,
                "Authorization required".to_string(),
                Some(url),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            AppError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "Request timed out".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error,
            authorization_url,
        });

        (status, body).into_response()
    }
}

impl AppState {
    /// Identifies the caller from the bearer token.
    fn caller(&self, headers: &HeaderMap) -> Result<Claims, AppError> {
        authenticate(headers, &self.client_secret).map_err(|e| {
            debug!(error = %e, "Rejected caller token");
            AppError::Unauthorized(e.to_string())
        })
    }

    /// Runs a handler body under the request timeout.
    ///
    /// Dropping the inner future on timeout cancels any pending storage or
    /// upstream call; a storage transaction already running still commits
    /// or rolls back as a unit.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                warn!(timeout_secs = self.request_timeout.as_secs(), "Request timed out");
                AppError::Timeout
            })?
    }
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

/// Create the complete API router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health))
        .merge(create_install_router(Arc::clone(&state)))
        .merge(create_authentication_router(Arc::clone(&state)))
        .merge(create_settings_router(state))
        .layer(cors_layer(cors_origins))
}
