use std::sync::Arc;

use anonset::{config::ServerConfig, service::IdentityService};
use axum::{
    routing::{get, post},
    Router,
};

use crate::services::{group, health, identity};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IdentityService>,
    pub server: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/group", get(group::get_group))
        .route("/group/root", get(group::get_root))
        .route("/identity", post(identity::post_identity))
        .route("/identity/verify", post(identity::verify_identity))
        .route("/admin/group/reset", post(group::reset_group))
        .route("/admin/group/wipe", post(group::wipe_group))
        .with_state(state)
}
