use anyhow::Result;
use pv_inverter_poller::config::AppConfig;
use pv_inverter_poller::supervisor::{self, AppState};
use pv_inverter_poller::telemetry::{self, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default configuration");
        AppConfig::default()
    });
    let addr = cfg.server.socket_addr()?;

    let state = AppState::new(cfg);
    let app = pv_inverter_poller::api::router(state.clone());

    info!(%addr, "starting PV inverter poller");
    tokio::spawn(supervisor::run(state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}
