//! Per-route access control.
//!
//! Authentication itself happens in front of this server: the gateway
//! verifies the caller and forwards who they are in [`SUBJECT_HEADER`] and
//! [`EMAIL_HEADER`]. This module only decides, per [`Route`], what a request
//! has to carry.
use anonset::{crypto::identity::DerivationStrategy, service::Principal};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use subtle::ConstantTimeEq;

use crate::app::AppState;

pub const SUBJECT_HEADER: &str = "x-authenticated-subject";
pub const EMAIL_HEADER: &str = "x-authenticated-email";

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("The request does not carry an authenticated subject.")]
    MissingSubject,
    #[error("The configured identity strategy needs a verified email, but none was provided.")]
    MissingAux,
    #[error("Administrative routes are disabled.")]
    AdminDisabled,
    #[error("The administrative token is missing or invalid.")]
    InvalidToken,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    GroupState,
    GroupRoot,
    Identity,
    VerifyIdentity,
    ResetGroup,
    WipeGroup,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteProfile {
    Public,
    Principal { require_aux: bool },
    Admin,
}

impl Route {
    pub fn profile(self, strategy: DerivationStrategy) -> RouteProfile {
        match self {
            Route::Health | Route::GroupState | Route::GroupRoot => RouteProfile::Public,
            Route::Identity | Route::VerifyIdentity => RouteProfile::Principal {
                require_aux: strategy.requires_aux(),
            },
            Route::ResetGroup | Route::WipeGroup => RouteProfile::Admin,
        }
    }
}

/// What an authorized request is allowed to act as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Principal(Principal),
    Admin,
}

impl Access {
    pub fn into_principal(self) -> Result<Principal, AuthenticationError> {
        match self {
            Access::Principal(principal) => Ok(principal),
            Access::Public | Access::Admin => Err(AuthenticationError::MissingSubject),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn authorize(
    route: Route,
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Access, AuthenticationError> {
    match route.profile(state.service.deriver().strategy()) {
        RouteProfile::Public => Ok(Access::Public),
        RouteProfile::Principal { require_aux } => {
            let subject_id = header(headers, SUBJECT_HEADER).ok_or(AuthenticationError::MissingSubject)?;
            let aux_identifier = header(headers, EMAIL_HEADER).map(str::to_string);

            if require_aux && aux_identifier.is_none() {
                return Err(AuthenticationError::MissingAux);
            }

            Ok(Access::Principal(Principal::new(subject_id, aux_identifier)))
        }
        RouteProfile::Admin => {
            let expected = state
                .server
                .admin_token
                .as_ref()
                .ok_or(AuthenticationError::AdminDisabled)?;

            let provided = header(headers, AUTHORIZATION.as_str())
                .and_then(|value| value.strip_prefix("Bearer "))
                .ok_or(AuthenticationError::InvalidToken)?;

            if bool::from(provided.trim().as_bytes().ct_eq(expected.as_bytes())) {
                Ok(Access::Admin)
            } else {
                tracing::warn!("Rejected administrative request with an invalid token");
                Err(AuthenticationError::InvalidToken)
            }
        }
    }
}
