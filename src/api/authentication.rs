use super::{AppError, AppState};
use crate::credentials::TokenError;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Token status returned to the board frontend; never the token itself
#[derive(Debug, Serialize)]
pub struct AuthenticationResponse {
    pub token_type: String,
    pub expires_at: i64,
    pub scope: String,
}

/// Create authentication router
pub fn create_authentication_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/authentication", get(get_authentication))
        .with_state(state)
}

/// GET /api/authentication
///
/// Confirms the caller has a usable grant, refreshing an expired token on
/// the way. Callers without one get 401 with the authorization URL.
async fn get_authentication(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthenticationResponse>, AppError> {
    let caller = state.caller(&headers)?;

    let auth = state
        .bounded(async {
            state
                .tokens
                .find(&caller.team, &caller.user)
                .await
                .map_err(|e| token_error(&state, &caller.team, &caller.user, e))
        })
        .await?;

    Ok(Json(AuthenticationResponse {
        token_type: auth.token_type,
        expires_at: auth.expires_at,
        scope: auth.scope,
    }))
}

fn token_error(state: &AppState, team_id: &str, user_id: &str, err: TokenError) -> AppError {
    match &err {
        TokenError::TokenMissing => {
            debug!(team_id = %team_id, user_id = %user_id, "No authentication, reauthorization required");
            AppError::Reauthorize(state.authorization_url.clone())
        }
        TokenError::RefreshFailed(_) => {
            warn!(team_id = %team_id, user_id = %user_id, error = %err, "Refresh rejected, reauthorization required");
            AppError::Reauthorize(state.authorization_url.clone())
        }
        _ => {
            error!(team_id = %team_id, user_id = %user_id, error = %err, "Failed to load authentication");
            AppError::ServerError("Failed to load authentication".to_string())
        }
    }
}
