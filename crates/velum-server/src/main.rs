use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use velum_core::config::ServerConfig;
use velum_server::{build_router, Backend};

fn load_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("VELUM_BIND_ADDR") {
        if let Ok(addr) = addr.parse() {
            config.bind_addr = addr;
        }
    }
    if let Ok(token) = std::env::var("VELUM_ADMINISTRATION_TOKEN") {
        config.administration_token = token;
    }
    if std::env::var("VELUM_SPONTANEOUS_BOOTSTRAP").is_ok() {
        config.organization_spontaneous_bootstrap = true;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config();
    let bind_addr = config.bind_addr;
    let backend = Arc::new(Backend::in_memory(config));
    let router = build_router(backend);

    info!(%bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("binding the RPC listener")?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")?;
    Ok(())
}
