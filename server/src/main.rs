use std::{net::SocketAddr, str::FromStr, sync::Arc};

use anonset::{config::Config, service::IdentityService};
use tracing::Level;

use crate::app::{router, AppState};

pub mod app;
pub mod authenticator;
pub mod error;
pub mod services;

/// jemalloc is an allocator that is more efficient for the server.
#[cfg(feature = "jemalloc")]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise the logger
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| Level::from_str(level.trim()).ok())
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .pretty()
        .init();

    let config = Config::from_env().inspect_err(|err| {
        tracing::error!("Invalid configuration: {err}");
    })?;

    let state = AppState {
        service: Arc::new(IdentityService::from_config(&config)),
        server: Arc::new(config.server.clone()),
    };

    tracing::info!(
        "Starting in {:?} mode, identity context version {}, group data under {}",
        config.run_mode,
        config.identity.context_label.version(),
        state.service.store().data_dir().display()
    );

    // Load (or create, or recover) the group before accepting requests.
    let group = state.service.store().state()?;
    tracing::info!(
        "Group {} loaded with {} member(s), root {}",
        group.group_id,
        group.len(),
        group.root
    );

    start(config.server.bind_addr, state).await
}

pub async fn start(addr: SocketAddr, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
