use axum::{extract::State, routing::get, Router};
use backhaul_common::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Serve `/metrics` and `/health` until the process exits
pub async fn start_metrics_server(addr: SocketAddr, metrics_handle: PrometheusHandle) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
