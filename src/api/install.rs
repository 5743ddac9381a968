//! App installation callback.
//!
//! The provider redirects here with an authorization code once a team
//! admin installs the app:
//! 1. Exchange the code for a token
//! 2. Convert and store it encrypted under (team, user)
//! 3. Redirect the browser back to the application

use super::{AppError, AppState};
use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Install callback query parameters
#[derive(Deserialize)]
pub struct InstallCallback {
    code: Option<String>,
    error: Option<String>,
}

/// Create install router
pub fn create_install_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/oauth/install", get(install))
        .with_state(state)
}

/// GET /oauth/install
///
/// Failures answer 400 with the authorization URL so the user can retry
/// the installation.
async fn install(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InstallCallback>,
) -> Result<Redirect, AppError> {
    if let Some(err) = params.error {
        warn!(error = %err, "Provider returned an installation error");
        return Err(retry(&state));
    }

    let code = params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| {
            warn!("Install callback without authorization code");
            retry(&state)
        })?;

    state
        .bounded(async {
            let token = state.tokens.exchange(&code).await.map_err(|_| retry(&state))?;

            if token.team_id.is_empty() || token.user_id.is_empty() {
                warn!("Provider token carries no team or user");
                return Err(retry(&state));
            }

            let auth = state.tokens.convert(&token).map_err(|e| {
                error!(team_id = %token.team_id, error = %e, "Failed to convert provider token");
                retry(&state)
            })?;

            state
                .tokens
                .save(&token.team_id, &token.user_id, &auth)
                .await
                .map_err(|_| retry(&state))?;

            info!(team_id = %token.team_id, user_id = %token.user_id, "App installed");
            Ok(())
        })
        .await?;

    Ok(Redirect::to(&state.application_url))
}

fn retry(state: &AppState) -> AppError {
    AppError::InstallFailed(state.authorization_url.clone())
}
