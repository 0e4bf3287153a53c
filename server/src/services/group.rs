use anonset::group::GroupState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

use crate::{
    app::AppState,
    authenticator::{authorize, Route},
    error::ApiError,
};

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub root: String,
}

pub async fn get_group(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GroupState>, ApiError> {
    authorize(Route::GroupState, &headers, &state)?;

    Ok(Json(state.service.store().state()?))
}

pub async fn get_root(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RootResponse>, ApiError> {
    authorize(Route::GroupRoot, &headers, &state)?;

    Ok(Json(RootResponse {
        root: state.service.store().merkle_root()?,
    }))
}

/// Empties the group. The previous revision stays in the backup file.
pub async fn reset_group(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RootResponse>, ApiError> {
    authorize(Route::ResetGroup, &headers, &state)?;

    let store = state.service.store();
    store.reset()?;

    Ok(Json(RootResponse {
        root: store.merkle_root()?,
    }))
}

/// Deletes every group file, backup included.
pub async fn wipe_group(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(Route::WipeGroup, &headers, &state)?;

    state.service.store().complete_reset()?;

    Ok(StatusCode::NO_CONTENT)
}
