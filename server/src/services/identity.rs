//! Identity routes. Responses carry the commitment only, never the private
//! scalar it was derived from.
use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::{
    app::AppState,
    authenticator::{authorize, Route},
    error::ApiError,
};

#[derive(Debug, Default, Deserialize)]
pub struct IdentityRequest {
    #[serde(default)]
    pub register: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub commitment: String,
    pub newly_registered: bool,
    pub is_member: bool,
    pub root: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub commitment: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

pub async fn post_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IdentityRequest>,
) -> Result<Json<IdentityResponse>, ApiError> {
    let principal = authorize(Route::Identity, &headers, &state)?.into_principal()?;

    let enrollment = state.service.enroll(&principal, request.register)?;
    if enrollment.newly_registered {
        tracing::info!(
            "Registered commitment {}",
            enrollment.identity.commitment()
        );
    }

    Ok(Json(IdentityResponse {
        commitment: enrollment.identity.commitment().to_string(),
        newly_registered: enrollment.newly_registered,
        is_member: enrollment.is_member,
        root: enrollment.root,
    }))
}

pub async fn verify_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let principal = authorize(Route::VerifyIdentity, &headers, &state)?.into_principal()?;

    Ok(Json(VerifyResponse {
        valid: state.service.verify(&principal, &request.commitment)?,
    }))
}
