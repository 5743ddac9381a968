use super::{AppError, AppState};
use crate::settings::{Demo, SaveOptions, SettingsError};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Deserialize)]
pub struct BoardQuery {
    board_id: String,
}

/// Settings update request
#[derive(Deserialize)]
pub struct SaveSettingsRequest {
    board_id: String,
    #[serde(flatten)]
    options: SaveOptions,
}

/// Board settings as shown to the frontend; the secret is never echoed
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub address: String,
    pub header: String,
    pub has_secret: bool,
    pub demo: Demo,
}

/// Create settings router
pub fn create_settings_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).post(save_settings))
        .with_state(state)
}

/// GET /api/settings?board_id=...
async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BoardQuery>,
) -> Result<Json<SettingsResponse>, AppError> {
    let caller = state.caller(&headers)?;
    let board_id = required_board(&query.board_id)?;

    let settings = state
        .bounded(async {
            state
                .settings
                .find(&caller.team, board_id)
                .await
                .map_err(settings_error)
        })
        .await?;

    Ok(Json(SettingsResponse {
        has_secret: !settings.secret.is_empty(),
        address: settings.address,
        header: settings.header,
        demo: settings.demo,
    }))
}

/// POST /api/settings
async fn save_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SaveSettingsRequest>,
) -> Result<StatusCode, AppError> {
    let caller = state.caller(&headers)?;
    let board_id = required_board(&request.board_id)?;

    state
        .bounded(async {
            state
                .settings
                .save(&caller.team, board_id, &request.options)
                .await
                .map_err(settings_error)
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn required_board(board_id: &str) -> Result<&str, AppError> {
    if board_id.is_empty() {
        return Err(AppError::BadRequest("board_id is required".to_string()));
    }
    Ok(board_id)
}

fn settings_error(err: SettingsError) -> AppError {
    if err.is_invalid_input() {
        return AppError::BadRequest(err.to_string());
    }

    error!(error = %err, "Settings operation failed");
    AppError::ServerError("Failed to process settings".to_string())
}
