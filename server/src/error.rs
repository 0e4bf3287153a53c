use anonset::error::{CryptoError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::authenticator::AuthenticationError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("AuthenticationError: {0}")]
    AuthenticationError(#[from] AuthenticationError),
    #[error("{0}")]
    ValidationError(#[from] ValidationError),
    #[error("Missing input: {0}")]
    MissingInput(&'static str),
    #[error("Internal server error")]
    InternalError,
}

impl From<anonset::Error> for ApiError {
    fn from(value: anonset::Error) -> Self {
        match value {
            anonset::Error::Validation(err) => Self::ValidationError(err),
            anonset::Error::Crypto(CryptoError::MissingInput(input)) => Self::MissingInput(input),
            other => {
                tracing::error!("Internal server error while processing request: {other}");
                Self::InternalError
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationError(
                AuthenticationError::MissingSubject | AuthenticationError::InvalidToken,
            ) => StatusCode::UNAUTHORIZED,
            ApiError::AuthenticationError(AuthenticationError::MissingAux)
            | ApiError::MissingInput(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthenticationError(AuthenticationError::AdminDisabled) => {
                StatusCode::NOT_FOUND
            }
            ApiError::ValidationError(ValidationError::TreeFull { .. }) => StatusCode::CONFLICT,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::AuthenticationError(err) => err.to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: body })).into_response()
    }
}
