use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::{
    app::AppState,
    authenticator::{authorize, Route},
    error::ApiError,
};

pub mod group;
pub mod identity;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub members: usize,
}

pub async fn health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HealthResponse>, ApiError> {
    authorize(Route::Health, &headers, &state)?;

    let group = state.service.store().state()?;

    Ok(Json(HealthResponse {
        status: "ok",
        members: group.len(),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use anonset::{
        config::{ServerConfig, StorageConfig},
        crypto::{
            codec::EncryptionKey,
            identity::{ContextLabel, DerivationRealm, DerivationStrategy, IdentityDeriver},
        },
        group::MembershipStore,
        service::IdentityService,
    };

    use super::*;

    pub(crate) fn test_state(admin_token: Option<&str>) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let deriver = IdentityDeriver::new(
            b"a server test secret of at least 32 bytes",
            DerivationStrategy::SubjectOnly,
            ContextLabel::parse("anonset-server-test-v1").expect("label is valid"),
            DerivationRealm {
                issuer: "https://issuer.example.com".to_string(),
                client_id: "server-test".to_string(),
            },
        );
        let store = MembershipStore::open(&StorageConfig::new(dir.path()), EncryptionKey::generate());

        let state = AppState {
            service: Arc::new(IdentityService::new(deriver, store)),
            server: Arc::new(ServerConfig {
                bind_addr: "127.0.0.1:0".parse().expect("valid address"),
                admin_token: admin_token.map(|token| token.to_string().into()),
            }),
        };

        (dir, state)
    }

    #[tokio::test]
    async fn health_reports_the_group_size() {
        let (_dir, state) = test_state(None);

        let Json(response) = health(State(state), HeaderMap::new())
            .await
            .expect("health works");

        assert_eq!(response.status, "ok", "status");
        assert_eq!(response.members, 0, "new group is empty");
    }
}
