//! Reference backend: a local stand-in for the remote portal API.
//!
//! Serves the same auth, stock-feed and video-catalog endpoints the client core
//! talks to, backed by sled. Used by the `portal-dev-server` binary and the
//! end-to-end tests.

pub mod auth;
pub mod rest;
pub mod store;

pub use rest::{create_router, AppState};
pub use store::{BackendStore, UserRecord};

use std::future::Future;
use tokio::net::TcpListener;

use crate::config::BackendConfig;
use crate::error::Result;
use auth::TokenIssuer;

/// Open the configured data directory and build handler state from it.
pub fn open(config: &BackendConfig) -> Result<AppState> {
    let store = BackendStore::open(&config.data_path)?;
    Ok(AppState::new(
        store,
        TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl_secs),
        config.fixed_code.clone(),
    ))
}

/// Serve `state` on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
