//! Portal dev server
//!
//! Runs the reference backend locally so the CLI and client core have something
//! to talk to:
//! - Auth: bcrypt passwords, JWT bearer tokens, optional second factor
//! - Feeds: stock snapshot and video catalog from sled
//!
//! Usage:
//!   cargo run --bin seed_data            # populate sample users, stock, videos
//!   cargo run --bin portal-dev-server    # serve on PORTAL_BIND_ADDR (default :11111)

use tokio::net::TcpListener;
use tracing::info;

use dealer_portal::backend;
use dealer_portal::config::BackendConfig;
use dealer_portal::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BackendConfig::from_env()?;
    let _log_guard = init_tracing(
        "dealer_portal=info,portal_dev_server=info",
        config.log_json,
        config.log_dir.as_deref(),
    );

    if config.fixed_code.is_some() {
        tracing::warn!("PORTAL_FIXED_CODE is set: every second-factor code is predictable");
    }

    let state = backend::open(&config)?;
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, data = %config.data_path.display(), "portal dev server listening");

    backend::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;

    Ok(())
}
