//! Subcommand implementations

pub mod client;
pub mod secret;
pub mod server;
pub mod version;

use anyhow::{Context, Result};
use backhaul_observability::{init_logging, setup_metrics_recorder, start_metrics_server, LogFormat};
use clap::Args;
use std::net::SocketAddr;
use tracing::error;

/// Logging and metrics flags shared by both roles
#[derive(Args, Debug, Default)]
pub struct ObservabilityArgs {
    /// Emit logs as JSON lines
    #[arg(long, env = "BACKHAUL_LOG_JSON")]
    pub log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "BACKHAUL_METRICS_BIND")]
    pub metrics_bind: Option<SocketAddr>,
}

impl ObservabilityArgs {
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    /// Install the subscriber and, if requested, the metrics endpoint.
    pub fn init(&self) -> Result<()> {
        init_logging(self.log_format()).context("failed to initialize logging")?;

        if let Some(addr) = self.metrics_bind {
            let handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
            tokio::spawn(async move {
                if let Err(e) = start_metrics_server(addr, handle).await {
                    error!("Metrics server error: {}", e);
                }
            });
        }
        Ok(())
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
