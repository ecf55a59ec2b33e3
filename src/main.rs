use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use proximity_voice::config::Settings;
use proximity_voice::hub::HubHandle;
use proximity_voice::server;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let settings = Arc::new(Settings::from_env());
    let hub = HubHandle::new();

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address: {}", settings.listen_addr))?;

    let app = server::router(hub, settings);
    log::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
