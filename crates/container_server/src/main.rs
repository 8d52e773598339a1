mod access_log;
mod config;
mod handlers;
mod router;
mod state;
#[cfg(test)]
mod tests;

use std::net::SocketAddr;

use clap::Parser;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();
    tracing::info!(devices = ?config.devices, bind_address = %config.bind_address, "starting container service");

    let bind_address = config.bind_address;
    let state = state::build_state(config)?;
    let app = router::router(state);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(%bind_address, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };
    ctrl_c.await;
    tracing::info!("received Ctrl-C, shutting down");
}
